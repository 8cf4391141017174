//! Per-target circuit breaker.
//!
//! CLOSED counts consecutive failed executions; reaching the threshold trips
//! to OPEN. OPEN blocks everything until the backoff window has elapsed, then
//! HALF_OPEN allows exactly one trial. A successful trial closes the breaker;
//! a failed one re-opens it with a longer window (`backoff_factor`), capped at
//! `max_backoff`.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub base_backoff: Duration,
    /// 1.0 keeps the window fixed across repeated trips
    pub backoff_factor: f64,
    pub max_backoff: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_backoff: Duration::minutes(60),
            backoff_factor: 2.0,
            max_backoff: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    policy: BreakerPolicy,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    /// Trips since the breaker was last closed; drives exponential growth
    trips: u32,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, policy: BreakerPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trips: 0,
            trial_in_flight: false,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    /// Length of the current OPEN window.
    pub fn current_backoff(&self) -> Duration {
        let exponent = self.trips.saturating_sub(1) as i32;
        let factor = self.policy.backoff_factor.max(1.0).powi(exponent);
        let base_ms = self.policy.base_backoff.num_milliseconds() as f64;
        let max_ms = self.policy.max_backoff.num_milliseconds() as f64;
        Duration::milliseconds((base_ms * factor).min(max_ms) as i64)
    }

    /// State as of `now`, without applying the OPEN to HALF_OPEN transition.
    pub fn effective_state(&self, now: DateTime<Utc>) -> BreakerState {
        match (self.state, self.opened_at) {
            (BreakerState::Open, Some(opened_at)) if now - opened_at >= self.current_backoff() => {
                BreakerState::HalfOpen
            }
            (state, _) => state,
        }
    }

    /// Read-only form of `allows_attempt`; used while evaluating.
    pub fn permits(&self, now: DateTime<Utc>) -> bool {
        match self.effective_state(now) {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => self.state == BreakerState::Open || !self.trial_in_flight,
            BreakerState::Open => false,
        }
    }

    /// Moves OPEN to HALF_OPEN once the backoff window has elapsed.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> BreakerState {
        if self.state == BreakerState::Open && self.effective_state(now) == BreakerState::HalfOpen {
            self.state = BreakerState::HalfOpen;
            self.trial_in_flight = false;
            info!(
                "Circuit breaker [{}]: backoff elapsed, HALF_OPEN for one trial",
                self.name
            );
        }
        self.state
    }

    /// Whether an execution attempt may be made at `now`.
    pub fn allows_attempt(&mut self, now: DateTime<Utc>) -> bool {
        match self.refresh(now) {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => !self.trial_in_flight,
            BreakerState::Open => false,
        }
    }

    /// Claims the attempt. In HALF_OPEN this consumes the single trial.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> bool {
        if !self.allows_attempt(now) {
            return false;
        }
        if self.state == BreakerState::HalfOpen {
            self.trial_in_flight = true;
        }
        true
    }

    /// Gives back a claimed attempt that never reached the chain.
    pub fn cancel_attempt(&mut self) {
        self.trial_in_flight = false;
    }

    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            info!("Circuit breaker [{}]: trial succeeded, CLOSED", self.name);
        }
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trips = 0;
        self.trial_in_flight = false;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            BreakerState::Closed => {
                if self.consecutive_failures >= self.policy.failure_threshold {
                    self.trip(now);
                } else {
                    debug!(
                        "Circuit breaker [{}]: failure recorded ({}/{})",
                        self.name, self.consecutive_failures, self.policy.failure_threshold
                    );
                }
            }
            BreakerState::HalfOpen => self.trip(now),
            BreakerState::Open => {
                // No attempt should run while OPEN; restart the window anyway.
                self.opened_at = Some(now);
            }
        }
    }

    fn trip(&mut self, now: DateTime<Utc>) {
        self.trips = self.trips.saturating_add(1);
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
        warn!(
            "Circuit breaker [{}]: OPENED after {} consecutive failures, backoff {}s",
            self.name,
            self.consecutive_failures,
            self.current_backoff().num_seconds()
        );
    }
}
