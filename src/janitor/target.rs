//! Validated maintenance targets and their mutable runtime state.

use crate::janitor::circuit_breaker::CircuitBreaker;
use crate::utils::encode_hex;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// One contract + allowlisted function the janitor may call.
///
/// Built only through config validation; every field has already been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub address: String,
    pub chain: String,
    /// The only function selector ever submitted for this target
    pub selector: [u8; 4],
    /// Read-only function returning the pending reward as uint256
    pub reward_selector: [u8; 4],
    /// Pre-encoded arguments appended to `selector`
    pub args: Vec<u8>,
    pub min_pending_reward_tokens: f64,
    pub reward_token_decimals: u8,
    pub reward_price_usd: f64,
    /// Protocol's cut of the harvested reward paid to the caller (informational)
    pub call_fee_bps: u32,
    pub profit_multiplier: f64,
    pub cooldown: Duration,
    pub gas_limit: u64,
    pub enabled: bool,
}

impl Target {
    /// Calldata for the allowlisted maintenance call.
    pub fn calldata(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.args.len());
        data.extend_from_slice(&self.selector);
        data.extend_from_slice(&self.args);
        data
    }

    pub fn selector_hex(&self) -> String {
        encode_hex(&self.selector)
    }

    /// Profit-gate floor in USD derived from the token threshold.
    pub fn min_pending_reward_usd(&self, token_price_usd: f64) -> f64 {
        self.min_pending_reward_tokens * token_price_usd
    }

    /// Caller's expected payout, given the protocol call fee.
    pub fn expected_call_fee_usd(&self, pending_reward_usd: f64) -> f64 {
        pending_reward_usd * self.call_fee_bps as f64 / 10_000.0
    }
}

/// Mutable per-target state, owned by the chain loop.
#[derive(Debug, Clone)]
pub struct TargetState {
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub breaker: CircuitBreaker,
}

impl TargetState {
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self {
            last_evaluated_at: None,
            last_executed_at: None,
            breaker,
        }
    }

    pub fn snapshot(&self, target: &Target) -> TargetSnapshot {
        TargetSnapshot {
            name: target.name.clone(),
            chain: target.chain.clone(),
            enabled: target.enabled,
            last_evaluated_at: self.last_evaluated_at,
            last_executed_at: self.last_executed_at,
            consecutive_failures: self.breaker.consecutive_failures(),
            breaker_state: self.breaker.state().as_str().to_string(),
        }
    }
}

/// Read-only view for status logging.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSnapshot {
    pub name: String,
    pub chain: String,
    pub enabled: bool,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub breaker_state: String,
}
