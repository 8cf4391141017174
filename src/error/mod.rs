use log::{debug, error, info, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Failures reported by a single JSON-RPC endpoint.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    /// Timeouts, refused connections, 5xx responses
    #[error("transient RPC failure: {0}")]
    Transient(String),

    #[error("RPC endpoint rate limited the request")]
    RateLimited,

    /// The node refused the transaction because the wallet cannot pay for it
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Nonce too low / replacement underpriced
    #[error("nonce conflict: {0}")]
    Nonce(String),

    /// The node already holds this exact transaction in its pool
    #[error("transaction already known: {0}")]
    AlreadyKnown(String),

    /// Any other JSON-RPC error, including reverted calls
    #[error("rejected by node: {0}")]
    Rejected(String),

    #[error("malformed RPC response: {0}")]
    Decode(String),
}

impl RpcError {
    /// Only transport-level failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transient(_) | RpcError::RateLimited)
    }
}

#[derive(Debug, Clone, Error)]
pub enum JanitorError {
    /// Bad target definition, missing allowlist entry, bad env value
    #[error("Config Error: {0}")]
    ConfigError(String),

    #[error("RPC Error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Signing Error: {0}")]
    SigningError(String),

    #[error("Timeout Error: {0}")]
    TimeoutError(String),

    #[error("Insufficient Balance: {0}")]
    InsufficientBalance(String),

    /// Calldata does not start with the target's allowlisted selector
    #[error("Selector not allowlisted for {target}: {selector}")]
    SelectorNotAllowed { target: String, selector: String },

    #[error("Gas too high: max fee {max_fee_gwei:.4} gwei exceeds ceiling {ceiling_gwei:.4} gwei")]
    GasTooHigh { max_fee_gwei: f64, ceiling_gwei: f64 },

    #[error("Ledger Error: {0}")]
    LedgerError(String),

    #[error("IO Error: {0}")]
    IoError(String),

    #[error("Parse Error: {0}")]
    ParseError(String),
}

impl From<serde_json::Error> for JanitorError {
    fn from(err: serde_json::Error) -> Self {
        JanitorError::ParseError(format!("JSON serialization/deserialization error: {}", err))
    }
}

impl From<std::io::Error> for JanitorError {
    fn from(err: std::io::Error) -> Self {
        JanitorError::IoError(err.to_string())
    }
}

impl JanitorError {
    /// Whether the same operation may succeed if tried again within this cycle.
    pub fn should_retry(&self) -> bool {
        match self {
            JanitorError::Rpc(e) => e.is_transient(),
            JanitorError::TimeoutError(_) => true,
            JanitorError::SigningError(msg) => msg.contains("timeout") || msg.contains("connect"),
            _ => false,
        }
    }
}

/// Retry policy with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before `attempt` (0-based). The first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let factor = 2_u128.saturating_pow(attempt - 1);
        let delay_ms = self.base_delay.as_millis().saturating_mul(factor);
        let delay = Duration::from_millis(delay_ms.min(self.max_delay.as_millis()) as u64);

        debug!("Retry attempt {}: delay = {:?}", attempt, delay);
        delay
    }

    /// Runs `operation` until it succeeds, returns a non-retryable error, or
    /// attempts run out.
    pub async fn execute<F, T, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..self.max_attempts.max(1) {
            if attempt > 0 {
                sleep(self.delay_for_attempt(attempt)).await;
            }

            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 0 {
                        info!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(e) if !e.should_retry() => {
                    warn!("Non-retryable error on attempt {}: {}", attempt + 1, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Attempt {} failed: {} (retrying...)", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        error!("All {} retry attempts failed", self.max_attempts);
        Err(last_error.unwrap_or_else(|| {
            JanitorError::TimeoutError("max retries exceeded".to_string())
        }))
    }
}

pub type Result<T> = std::result::Result<T, JanitorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(6, Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(0));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
    }

    #[test]
    fn only_transport_errors_are_retried() {
        assert!(JanitorError::Rpc(RpcError::RateLimited).should_retry());
        assert!(JanitorError::Rpc(RpcError::Transient("refused".into())).should_retry());
        assert!(!JanitorError::Rpc(RpcError::Rejected("reverted".into())).should_retry());
        assert!(!JanitorError::InsufficientBalance("0 wei".into()).should_retry());
        assert!(!JanitorError::Rpc(RpcError::AlreadyKnown("already known".into())).should_retry());
        assert!(JanitorError::SigningError("connect/timeout: refused".into()).should_retry());
        assert!(!JanitorError::SigningError("unknown account".into()).should_retry());
    }

    #[tokio::test]
    async fn execute_stops_on_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(2));
        let result: Result<()> = policy
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(JanitorError::ConfigError("bad".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execute_retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, Duration::from_millis(1), Duration::from_millis(2));
        let result = policy
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(JanitorError::Rpc(RpcError::Transient("reset".into())))
                    } else {
                        Ok(7u32)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
