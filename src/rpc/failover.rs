//! Ordered multi-endpoint RPC with retry, backoff and rotation.

use super::{ChainRpc, Receipt};
use crate::error::{RetryPolicy, RpcError};
use crate::janitor::fee_estimator::FeeData;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Wraps an ordered endpoint list. Transient failures are retried with
/// exponential backoff; after `failover_threshold` consecutive failures on the
/// current endpoint the next one (wrapping) becomes current. The current
/// endpoint is sticky across calls.
pub struct FailoverRpc {
    endpoints: Vec<Arc<dyn ChainRpc>>,
    policy: RetryPolicy,
    failover_threshold: u32,
    current: AtomicUsize,
    consecutive_failures: AtomicU32,
}

impl FailoverRpc {
    pub fn new(endpoints: Vec<Arc<dyn ChainRpc>>, policy: RetryPolicy, failover_threshold: u32) -> Self {
        Self {
            endpoints,
            policy,
            failover_threshold: failover_threshold.max(1),
            current: AtomicUsize::new(0),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn current_index(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    fn current_endpoint(&self) -> Option<(usize, Arc<dyn ChainRpc>)> {
        if self.endpoints.is_empty() {
            return None;
        }
        let index = self.current_index() % self.endpoints.len();
        Some((index, Arc::clone(&self.endpoints[index])))
    }

    fn note_failure(&self, index: usize) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failover_threshold && self.endpoints.len() > 1 {
            let next = (index + 1) % self.endpoints.len();
            // Only rotate if nobody else already moved us off this endpoint.
            if self
                .current
                .compare_exchange(index, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                warn!(
                    "[RPC failover] {} failed {} times in a row, switching to {}",
                    self.endpoints[index].label(),
                    failures,
                    self.endpoints[next].label()
                );
            }
        }
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let delay = self.policy.delay_for_attempt(attempt);
        let delay_ms = delay.as_millis() as u64;
        if delay_ms == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..(delay_ms / 4).max(1));
        Duration::from_millis(delay_ms + jitter)
    }

    /// Every endpoint gets at least one attempt past the retry budget, so a
    /// rotation on the last retry still reaches the next endpoint.
    async fn execute_with_failover<F, Fut, T>(&self, operation: &str, mut rpc_call: F) -> Result<T, RpcError>
    where
        F: FnMut(Arc<dyn ChainRpc>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>> + Send,
        T: Send,
    {
        let budget = self.policy.max_attempts.max(1) + self.endpoints.len().saturating_sub(1) as u32;
        let mut last_error = RpcError::Transient("no RPC endpoints configured".to_string());

        for attempt in 0..budget {
            let Some((index, endpoint)) = self.current_endpoint() else {
                break;
            };
            if attempt > 0 {
                sleep(self.jittered(attempt)).await;
            }

            match rpc_call(endpoint.clone()).await {
                Ok(result) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    if attempt > 0 {
                        info!(
                            "[RPC {}] succeeded on {} after {} retries",
                            operation,
                            endpoint.label(),
                            attempt
                        );
                    } else {
                        debug!("[RPC {}] ok via {}", operation, endpoint.label());
                    }
                    return Ok(result);
                }
                Err(e) if !e.is_transient() => {
                    // The node answered; another endpoint would answer the same.
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    debug!("[RPC {}] non-retryable via {}: {}", operation, endpoint.label(), e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "[RPC {}] attempt {}/{} via {} failed: {}",
                        operation,
                        attempt + 1,
                        budget,
                        endpoint.label(),
                        e
                    );
                    self.note_failure(index);
                    last_error = e;
                }
            }
        }

        error!("[RPC {}] all attempts failed: {}", operation, last_error);
        Err(last_error)
    }
}

#[async_trait]
impl ChainRpc for FailoverRpc {
    fn label(&self) -> String {
        match self.current_endpoint() {
            Some((_, endpoint)) => format!("failover({})", endpoint.label()),
            None => "failover(empty)".to_string(),
        }
    }

    async fn get_fee_data(&self) -> Result<FeeData, RpcError> {
        self.execute_with_failover("get_fee_data", |client| async move { client.get_fee_data().await })
            .await
    }

    async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        self.execute_with_failover("call", |client| {
            let to = to.to_string();
            let data = data.to_vec();
            async move { client.call(&to, &data).await }
        })
        .await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError> {
        self.execute_with_failover("send_raw_transaction", |client| {
            let raw = raw.to_vec();
            async move { client.send_raw_transaction(&raw).await }
        })
        .await
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, RpcError> {
        self.execute_with_failover("get_receipt", |client| {
            let tx_hash = tx_hash.to_string();
            async move { client.get_receipt(&tx_hash).await }
        })
        .await
    }

    async fn get_transaction_count(&self, address: &str) -> Result<u64, RpcError> {
        self.execute_with_failover("get_transaction_count", |client| {
            let address = address.to_string();
            async move { client.get_transaction_count(&address).await }
        })
        .await
    }

    async fn get_balance(&self, address: &str) -> Result<u128, RpcError> {
        self.execute_with_failover("get_balance", |client| {
            let address = address.to_string();
            async move { client.get_balance(&address).await }
        })
        .await
    }

    async fn estimate_gas(&self, from: Option<&str>, to: &str, data: &[u8]) -> Result<u64, RpcError> {
        self.execute_with_failover("estimate_gas", |client| {
            let from = from.map(str::to_string);
            let to = to.to_string();
            let data = data.to_vec();
            async move { client.estimate_gas(from.as_deref(), &to, &data).await }
        })
        .await
    }
}
