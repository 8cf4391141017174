use crate::error::{JanitorError, RetryPolicy};
use crate::janitor::circuit_breaker::BreakerPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Process-wide settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub profit_multiplier: f64,
    pub min_net_usd: f64,
    pub max_consecutive_failures: u32,
    pub circuit_breaker_minutes: u64,
    pub circuit_breaker_backoff_factor: f64,
    pub circuit_breaker_max_minutes: u64,
    pub poll_interval_secs: u64,
    pub inclusion_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
    pub rpc_max_retries: u32,
    pub rpc_retry_delay_ms: u64,
    pub rpc_retry_max_delay_ms: u64,
    pub rpc_failover_threshold: u32,
    pub rpc_timeout_secs: u64,
    pub max_concurrent_evaluations: usize,
    pub ledger_path: String,
    pub log_level: String,
    pub log_file: Option<String>,
    pub dry_run: bool,
    pub summary_every_cycles: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profit_multiplier: 1.5,
            min_net_usd: 0.0,
            max_consecutive_failures: 3,
            circuit_breaker_minutes: 60,
            circuit_breaker_backoff_factor: 2.0,
            circuit_breaker_max_minutes: 1440,
            poll_interval_secs: 5,
            inclusion_timeout_secs: 60,
            receipt_poll_interval_ms: 1000,
            rpc_max_retries: 3,
            rpc_retry_delay_ms: 500,
            rpc_retry_max_delay_ms: 10_000,
            rpc_failover_threshold: 1,
            rpc_timeout_secs: 10,
            max_concurrent_evaluations: 4,
            ledger_path: "data/ledger.jsonl".to_string(),
            log_level: "info".to_string(),
            log_file: None,
            dry_run: false,
            summary_every_cycles: 100,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            profit_multiplier: env_or("PROFIT_MULTIPLIER", defaults.profit_multiplier),
            min_net_usd: env_or("MIN_NET_USD", defaults.min_net_usd),
            max_consecutive_failures: env_or(
                "MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            ),
            circuit_breaker_minutes: env_or(
                "CIRCUIT_BREAKER_MINUTES",
                defaults.circuit_breaker_minutes,
            ),
            circuit_breaker_backoff_factor: env_or(
                "CIRCUIT_BREAKER_BACKOFF_FACTOR",
                defaults.circuit_breaker_backoff_factor,
            ),
            circuit_breaker_max_minutes: env_or(
                "CIRCUIT_BREAKER_MAX_MINUTES",
                defaults.circuit_breaker_max_minutes,
            ),
            poll_interval_secs: env_or("POLL_INTERVAL_SECS", defaults.poll_interval_secs),
            inclusion_timeout_secs: env_or(
                "INCLUSION_TIMEOUT_SECS",
                defaults.inclusion_timeout_secs,
            ),
            receipt_poll_interval_ms: env_or(
                "RECEIPT_POLL_INTERVAL_MS",
                defaults.receipt_poll_interval_ms,
            ),
            rpc_max_retries: env_or("RPC_MAX_RETRIES", defaults.rpc_max_retries),
            rpc_retry_delay_ms: env_or("RPC_RETRY_DELAY_MS", defaults.rpc_retry_delay_ms),
            rpc_retry_max_delay_ms: env_or(
                "RPC_RETRY_MAX_DELAY_MS",
                defaults.rpc_retry_max_delay_ms,
            ),
            rpc_failover_threshold: env_or(
                "RPC_FAILOVER_THRESHOLD",
                defaults.rpc_failover_threshold,
            ),
            rpc_timeout_secs: env_or("RPC_TIMEOUT_SECS", defaults.rpc_timeout_secs),
            max_concurrent_evaluations: env_or(
                "MAX_CONCURRENT_EVALUATIONS",
                defaults.max_concurrent_evaluations,
            ),
            ledger_path: env::var("LEDGER_PATH").unwrap_or(defaults.ledger_path),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_file: env::var("LOG_FILE").ok().filter(|s| !s.trim().is_empty()),
            dry_run: env_or("DRY_RUN", defaults.dry_run),
            summary_every_cycles: env_or("SUMMARY_EVERY_CYCLES", defaults.summary_every_cycles),
        }
    }

    pub fn validate(&self) -> Result<(), JanitorError> {
        if !(self.profit_multiplier > 0.0) {
            return Err(JanitorError::ConfigError(format!(
                "PROFIT_MULTIPLIER must be > 0, got {}",
                self.profit_multiplier
            )));
        }
        if self.min_net_usd < 0.0 {
            return Err(JanitorError::ConfigError("MIN_NET_USD cannot be negative".to_string()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(JanitorError::ConfigError(
                "MAX_CONSECUTIVE_FAILURES must be at least 1".to_string(),
            ));
        }
        if self.circuit_breaker_backoff_factor < 1.0 {
            return Err(JanitorError::ConfigError(
                "CIRCUIT_BREAKER_BACKOFF_FACTOR must be >= 1.0".to_string(),
            ));
        }
        if self.circuit_breaker_max_minutes < self.circuit_breaker_minutes {
            return Err(JanitorError::ConfigError(
                "CIRCUIT_BREAKER_MAX_MINUTES must be >= CIRCUIT_BREAKER_MINUTES".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(JanitorError::ConfigError("POLL_INTERVAL_SECS must be > 0".to_string()));
        }
        if self.inclusion_timeout_secs == 0 {
            return Err(JanitorError::ConfigError(
                "INCLUSION_TIMEOUT_SECS must be > 0".to_string(),
            ));
        }
        if self.rpc_max_retries == 0 || self.rpc_failover_threshold == 0 {
            return Err(JanitorError::ConfigError(
                "RPC_MAX_RETRIES and RPC_FAILOVER_THRESHOLD must be > 0".to_string(),
            ));
        }
        if self.max_concurrent_evaluations == 0 {
            return Err(JanitorError::ConfigError(
                "MAX_CONCURRENT_EVALUATIONS must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn log_settings(&self) {
        log::info!("Application Configuration Loaded: {:?}", self);
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.rpc_max_retries,
            Duration::from_millis(self.rpc_retry_delay_ms),
            Duration::from_millis(self.rpc_retry_max_delay_ms),
        )
    }

    pub fn breaker_policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            failure_threshold: self.max_consecutive_failures,
            base_backoff: chrono::Duration::minutes(self.circuit_breaker_minutes as i64),
            backoff_factor: self.circuit_breaker_backoff_factor,
            max_backoff: chrono::Duration::minutes(self.circuit_breaker_max_minutes as i64),
        }
    }

    pub fn inclusion_timeout(&self) -> Duration {
        Duration::from_secs(self.inclusion_timeout_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
