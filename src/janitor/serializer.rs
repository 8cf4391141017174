//! Execution serializer: one in-flight transaction per wallet.
//!
//! Every submission runs inside the wallet session, from nonce reservation to
//! a terminal status. Calldata is checked against the target's allowlisted
//! selector before anything else happens.

use crate::error::{JanitorError, RetryPolicy, RpcError};
use crate::janitor::fee_estimator::FeeQuote;
use crate::janitor::records::{ExecutionRecord, ExecutionStatus};
use crate::janitor::target::Target;
use crate::janitor::wallet::{WalletContext, WalletSession};
use crate::rpc::{ChainRpc, Receipt, TransactionSigner, TxFields};
use crate::utils::{encode_hex, gas_cost_usd, wei_to_gwei};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use uuid::Uuid;

/// What the scheduler hands over once the profit gate has approved.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub decision_id: Uuid,
    pub calldata: Vec<u8>,
    pub fee: FeeQuote,
    pub gas_units: u64,
    pub gross_reward_usd: f64,
    pub native_price_usd: f64,
}

pub struct ExecutionSerializer {
    chain: String,
    chain_id: u64,
    rpc: Arc<dyn ChainRpc>,
    signer: Arc<dyn TransactionSigner>,
    retry: RetryPolicy,
    inclusion_timeout: Duration,
    receipt_poll_interval: Duration,
}

enum Inclusion {
    Mined(Receipt),
    TimedOut,
}

impl ExecutionSerializer {
    pub fn new(
        chain: &str,
        chain_id: u64,
        rpc: Arc<dyn ChainRpc>,
        signer: Arc<dyn TransactionSigner>,
        retry: RetryPolicy,
        inclusion_timeout: Duration,
        receipt_poll_interval: Duration,
    ) -> Self {
        Self {
            chain: chain.to_string(),
            chain_id,
            rpc,
            signer,
            retry,
            inclusion_timeout,
            receipt_poll_interval,
        }
    }

    /// Submits the maintenance call and waits for a terminal status.
    /// Never fails: every outcome is an `ExecutionRecord`.
    pub async fn submit(&self, wallet: &WalletContext, target: &Target, request: ExecutionRequest) -> ExecutionRecord {
        if request.calldata.len() < 4 || request.calldata[..4] != target.selector {
            let err = JanitorError::SelectorNotAllowed {
                target: target.name.clone(),
                selector: encode_hex(&request.calldata[..request.calldata.len().min(4)]),
            };
            error!("[{}] REFUSED: {}", self.chain, err);
            return self.refused(target, &request, err.to_string());
        }
        if wallet.is_halted() {
            return self.refused(target, &request, "wallet halted".to_string());
        }

        let mut session = wallet.lock().await;
        // a submit queued behind the one that halted the wallet must not broadcast
        if wallet.is_halted() {
            return self.refused(target, &request, "wallet halted".to_string());
        }
        session.reconcile(self.rpc.as_ref()).await;

        let required = request.fee.max_fee_per_gas.saturating_mul(request.gas_units as u128);
        if let Err(e) = wallet.ensure_balance(self.rpc.as_ref(), required).await {
            return match e {
                JanitorError::InsufficientBalance(_) => self.refused(target, &request, e.to_string()),
                other => self.failed(target, &request, ExecutionStatus::RpcError, None, other.to_string()),
            };
        }

        let nonce = match session.reserve_nonce(self.rpc.as_ref()).await {
            Ok(nonce) => nonce,
            Err(e) => {
                warn!("[{}] {}: nonce lookup failed: {}", self.chain, target.name, e);
                return self.failed(target, &request, ExecutionStatus::RpcError, None, e.to_string());
            }
        };

        let tx = TxFields {
            chain_id: self.chain_id,
            from: wallet.address().to_string(),
            to: target.address.clone(),
            nonce,
            gas_limit: request.gas_units,
            max_fee_per_gas: request.fee.max_fee_per_gas,
            max_priority_fee_per_gas: request.fee.max_priority_fee_per_gas,
            value: 0,
            data: request.calldata.clone(),
        };

        let signed = match self.retry.execute(|_| self.signer.sign(&tx)).await {
            Ok(signed) => signed,
            Err(e) => {
                session.release(nonce);
                error!("[{}] {}: signing failed: {}", self.chain, target.name, e);
                return self.failed(target, &request, ExecutionStatus::RpcError, Some(nonce), e.to_string());
            }
        };

        let tx_hash = match self.rpc.send_raw_transaction(&signed.raw).await {
            Ok(hash) => hash,
            // an earlier attempt reached the mempool before the retry
            Err(RpcError::AlreadyKnown(msg)) => match signed.hash {
                Some(hash) => {
                    info!("[{}] {}: node already has {} ({})", self.chain, target.name, hash, msg);
                    hash
                }
                None => {
                    // nothing to poll; the nonce stays consumed
                    warn!(
                        "[{}] {}: nonce {} accepted by node but the hash is unknown: {}",
                        self.chain, target.name, nonce, msg
                    );
                    return self.failed(
                        target,
                        &request,
                        ExecutionStatus::TimedOut,
                        Some(nonce),
                        "accepted by node, hash unknown".to_string(),
                    );
                }
            },
            Err(e) => return self.broadcast_failed(wallet, &mut session, target, &request, nonce, e),
        };
        session.track_pending(nonce, &tx_hash, &target.name);
        info!(
            "[{}] {}: sent {} (nonce {}, max fee {:.4} gwei)",
            self.chain,
            target.name,
            tx_hash,
            nonce,
            wei_to_gwei(request.fee.max_fee_per_gas)
        );

        match self.wait_for_inclusion(&tx_hash).await {
            Inclusion::Mined(receipt) => {
                session.settle(nonce);
                self.mined(target, &request, nonce, receipt).await
            }
            Inclusion::TimedOut => {
                warn!(
                    "[{}] {}: {} not included within {:?}; nonce {} stays consumed",
                    self.chain, target.name, tx_hash, self.inclusion_timeout, nonce
                );
                let mut record = self.failed(
                    target,
                    &request,
                    ExecutionStatus::TimedOut,
                    Some(nonce),
                    format!("not included within {}s", self.inclusion_timeout.as_secs()),
                );
                record.tx_hash = Some(tx_hash);
                record
            }
        }
    }

    fn broadcast_failed(
        &self,
        wallet: &WalletContext,
        session: &mut WalletSession<'_>,
        target: &Target,
        request: &ExecutionRequest,
        nonce: u64,
        err: RpcError,
    ) -> ExecutionRecord {
        match &err {
            RpcError::Nonce(_) => session.resync(),
            RpcError::InsufficientFunds(msg) => {
                session.release(nonce);
                let required = request.fee.max_fee_per_gas.saturating_mul(request.gas_units as u128);
                wallet.halt(msg, required);
            }
            _ => session.release(nonce),
        }
        error!("[{}] {}: broadcast failed: {}", self.chain, target.name, err);
        self.failed(target, request, ExecutionStatus::RpcError, Some(nonce), err.to_string())
    }

    async fn wait_for_inclusion(&self, tx_hash: &str) -> Inclusion {
        let deadline = Instant::now() + self.inclusion_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Inclusion::TimedOut;
            }
            // a hung poll must not outlive the deadline
            match timeout(deadline - now, self.rpc.get_receipt(tx_hash)).await {
                Err(_) => return Inclusion::TimedOut,
                Ok(Ok(Some(receipt))) => return Inclusion::Mined(receipt),
                Ok(Ok(None)) => debug!("[{}] {} pending", self.chain, tx_hash),
                Ok(Err(e)) => debug!("[{}] receipt poll for {} failed: {}", self.chain, tx_hash, e),
            }
            let now = Instant::now();
            if now >= deadline {
                return Inclusion::TimedOut;
            }
            sleep(self.receipt_poll_interval.min(deadline - now)).await;
        }
    }

    async fn mined(&self, target: &Target, request: &ExecutionRequest, nonce: u64, receipt: Receipt) -> ExecutionRecord {
        let gas_cost = gas_cost_usd(receipt.gas_used, receipt.effective_gas_price, request.native_price_usd);
        let (status, gross, error) = if receipt.success {
            info!(
                "[{}] {}: CONFIRMED {} in block {}, gas {} (${:.4}), reward ${:.4}",
                self.chain,
                target.name,
                receipt.tx_hash,
                receipt.block_number,
                receipt.gas_used,
                gas_cost,
                request.gross_reward_usd
            );
            (ExecutionStatus::Confirmed, request.gross_reward_usd, None)
        } else {
            let reason = self.revert_reason(target, &request.calldata).await;
            warn!(
                "[{}] {}: REVERTED {} ({})",
                self.chain,
                target.name,
                receipt.tx_hash,
                reason.as_deref().unwrap_or("no reason")
            );
            (
                ExecutionStatus::Reverted,
                0.0,
                Some(reason.unwrap_or_else(|| "reverted".to_string())),
            )
        };

        ExecutionRecord {
            id: Uuid::new_v4(),
            decision_id: Some(request.decision_id),
            target: target.name.clone(),
            chain: self.chain.clone(),
            timestamp: Utc::now(),
            tx_hash: Some(receipt.tx_hash),
            nonce: Some(nonce),
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            gross_reward_usd: gross,
            gas_cost_usd: gas_cost,
            net_profit_usd: gross - gas_cost,
            status,
            error,
        }
    }

    /// Replays the call to recover the revert string, if the node gives one.
    async fn revert_reason(&self, target: &Target, calldata: &[u8]) -> Option<String> {
        match self.rpc.call(&target.address, calldata).await {
            Err(RpcError::Rejected(msg)) => Some(msg),
            _ => None,
        }
    }

    fn refused(&self, target: &Target, request: &ExecutionRequest, reason: String) -> ExecutionRecord {
        self.failed(target, request, ExecutionStatus::Refused, None, reason)
    }

    fn failed(
        &self,
        target: &Target,
        request: &ExecutionRequest,
        status: ExecutionStatus,
        nonce: Option<u64>,
        reason: String,
    ) -> ExecutionRecord {
        let mut record = ExecutionRecord::without_receipt(&target.name, &self.chain, Utc::now(), status, Some(reason));
        record.decision_id = Some(request.decision_id);
        record.nonce = nonce;
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::FailoverRpc;
    use crate::testing::{sample_target, MockRpc, MockSigner, ReceiptPlan, SAMPLE_WALLET};
    use assert_approx_eq::assert_approx_eq;
    use pretty_assertions::assert_eq;

    struct Fixture {
        rpc: Arc<MockRpc>,
        signer: Arc<MockSigner>,
        wallet: WalletContext,
        serializer: ExecutionSerializer,
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
    }

    fn fixture(timeout_ms: u64) -> Fixture {
        let rpc = Arc::new(MockRpc::new("node"));
        let signer = Arc::new(MockSigner::new());
        let serializer = ExecutionSerializer::new(
            "base",
            8453,
            rpc.clone(),
            signer.clone(),
            fast_retry(),
            Duration::from_millis(timeout_ms),
            Duration::from_millis(5),
        );
        Fixture {
            rpc,
            signer,
            wallet: WalletContext::new("base", SAMPLE_WALLET, 0),
            serializer,
        }
    }

    fn request(target: &Target) -> ExecutionRequest {
        ExecutionRequest {
            decision_id: Uuid::new_v4(),
            calldata: target.calldata(),
            fee: FeeQuote {
                max_fee_per_gas: 2_000_000_000,
                max_priority_fee_per_gas: 0,
            },
            gas_units: 100_000,
            gross_reward_usd: 20.0,
            native_price_usd: 50_000.0,
        }
    }

    #[tokio::test]
    async fn confirmed_execution_accounts_actual_cost() {
        let f = fixture(200);
        let target = sample_target("vault");
        f.rpc.set_receipt_costs(80_000, 1_000_000_000);

        let record = f.serializer.submit(&f.wallet, &target, request(&target)).await;
        assert_eq!(record.status, ExecutionStatus::Confirmed);
        assert_eq!(record.nonce, Some(0));
        assert_eq!(record.gas_used, 80_000);
        // 80k gas * 1 gwei = 0.00008 ETH at $50k
        assert_approx_eq!(record.gas_cost_usd, 4.0);
        assert_approx_eq!(record.net_profit_usd, 16.0);
        assert!(f.wallet.pending().await.is_empty());
    }

    #[tokio::test]
    async fn refuses_foreign_selector_without_broadcasting() {
        let f = fixture(200);
        let target = sample_target("vault");
        let mut req = request(&target);
        req.calldata = vec![0xa9, 0x05, 0x9c, 0xbb, 0x00];

        let record = f.serializer.submit(&f.wallet, &target, req).await;
        assert_eq!(record.status, ExecutionStatus::Refused);
        assert_eq!(f.signer.signed_count(), 0);
        assert_eq!(f.rpc.call_count("send_raw_transaction"), 0);
        assert!(record.error.unwrap().contains("0xa9059cbb"));
    }

    #[tokio::test]
    async fn timeout_keeps_nonce_consumed() {
        let f = fixture(30);
        let target = sample_target("vault");
        f.rpc.set_receipt_plan(&target.address, ReceiptPlan::Never);

        let first = f.serializer.submit(&f.wallet, &target, request(&target)).await;
        assert_eq!(first.status, ExecutionStatus::TimedOut);
        assert!(first.tx_hash.is_some());
        assert_eq!(f.wallet.pending().await.len(), 1);

        let second = f.serializer.submit(&f.wallet, &target, request(&target)).await;
        assert_eq!(second.nonce, Some(1));
        assert_eq!(f.rpc.sent_nonces(), vec![0, 1]);
    }

    #[tokio::test]
    async fn revert_records_reason() {
        let f = fixture(200);
        let target = sample_target("vault");
        f.rpc.set_receipt_plan(&target.address, ReceiptPlan::Revert);

        let record = f.serializer.submit(&f.wallet, &target, request(&target)).await;
        assert_eq!(record.status, ExecutionStatus::Reverted);
        assert_eq!(record.error.as_deref(), Some("execution reverted: nothing to harvest"));
        assert_eq!(record.gross_reward_usd, 0.0);
        assert!(record.net_profit_usd < 0.0);
    }

    #[tokio::test]
    async fn insufficient_funds_on_broadcast_halts_wallet() {
        let f = fixture(200);
        let target = sample_target("vault");
        f.rpc.fail_next(
            "send_raw_transaction",
            1,
            RpcError::InsufficientFunds("insufficient funds for gas".into()),
        );

        let record = f.serializer.submit(&f.wallet, &target, request(&target)).await;
        assert_eq!(record.status, ExecutionStatus::RpcError);
        assert!(f.wallet.is_halted());

        let next = f.serializer.submit(&f.wallet, &target, request(&target)).await;
        assert_eq!(next.status, ExecutionStatus::Refused);
        assert_eq!(f.signer.signed_count(), 1);
    }

    #[tokio::test]
    async fn low_balance_refuses_and_halts() {
        let f = fixture(200);
        let target = sample_target("vault");
        f.rpc.set_balance(1);

        let record = f.serializer.submit(&f.wallet, &target, request(&target)).await;
        assert_eq!(record.status, ExecutionStatus::Refused);
        assert!(f.wallet.is_halted());
        assert_eq!(f.signer.signed_count(), 0);
    }

    #[tokio::test]
    async fn nonce_error_forces_resync() {
        let f = fixture(200);
        let target = sample_target("vault");
        f.rpc.set_pending_count(4);
        f.rpc.fail_next("send_raw_transaction", 1, RpcError::Nonce("nonce too low".into()));

        let record = f.serializer.submit(&f.wallet, &target, request(&target)).await;
        assert_eq!(record.status, ExecutionStatus::RpcError);

        f.rpc.set_pending_count(6);
        let record = f.serializer.submit(&f.wallet, &target, request(&target)).await;
        assert_eq!(record.status, ExecutionStatus::Confirmed);
        assert_eq!(record.nonce, Some(6));
    }

    #[tokio::test]
    async fn resend_after_lost_ack_tracks_the_accepted_hash() {
        let node = Arc::new(MockRpc::new("node"));
        node.accept_then_fail_next_send(RpcError::Transient("timeout".into()));
        let signer = Arc::new(MockSigner::new());
        let serializer = ExecutionSerializer::new(
            "base",
            8453,
            Arc::new(FailoverRpc::new(vec![node.clone()], fast_retry(), 1)),
            signer.clone(),
            fast_retry(),
            Duration::from_millis(200),
            Duration::from_millis(5),
        );
        let wallet = WalletContext::new("base", SAMPLE_WALLET, 0);
        let target = sample_target("vault");

        let record = serializer.submit(&wallet, &target, request(&target)).await;
        assert_eq!(record.status, ExecutionStatus::Confirmed);
        assert_eq!(node.call_count("send_raw_transaction"), 2);
        assert_eq!(node.sent_nonces(), vec![0]);
        assert!(record.tx_hash.is_some());
        assert!(wallet.pending().await.is_empty());

        let next = serializer.submit(&wallet, &target, request(&target)).await;
        assert_eq!(next.nonce, Some(1));
    }

    #[tokio::test]
    async fn hung_receipt_poll_times_out_on_schedule() {
        let f = fixture(30);
        let target = sample_target("vault");
        f.rpc.set_method_latency("get_receipt", Duration::from_millis(500));

        let started = Instant::now();
        let record = f.serializer.submit(&f.wallet, &target, request(&target)).await;
        assert_eq!(record.status, ExecutionStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(f.wallet.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn signer_connect_failure_is_retried() {
        let f = fixture(200);
        let target = sample_target("vault");
        f.signer.fail_connect_next(1);

        let record = f.serializer.submit(&f.wallet, &target, request(&target)).await;
        assert_eq!(record.status, ExecutionStatus::Confirmed);
        assert_eq!(f.signer.signed_count(), 1);
        assert_eq!(f.rpc.sent_nonces(), vec![0]);
    }

    #[tokio::test]
    async fn rejected_signature_is_not_retried() {
        let f = fixture(200);
        let target = sample_target("vault");
        f.signer.set_failing(true);

        let record = f.serializer.submit(&f.wallet, &target, request(&target)).await;
        assert_eq!(record.status, ExecutionStatus::RpcError);
        assert_eq!(f.rpc.call_count("send_raw_transaction"), 0);

        f.signer.set_failing(false);
        let next = f.serializer.submit(&f.wallet, &target, request(&target)).await;
        assert_eq!(next.nonce, Some(0));
    }
}
