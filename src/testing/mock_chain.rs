//! Scripted in-process stand-ins for the chain collaborators.

use crate::error::{JanitorError, Result, RpcError};
use crate::janitor::fee_estimator::FeeData;
use crate::janitor::target::Target;
use crate::rpc::{ChainRpc, MarketData, Receipt, RewardQuote, SignedTx, TransactionSigner, TxFields};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// What the mock chain does with a transaction sent to a given address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptPlan {
    Success,
    Revert,
    /// Never mined; the receipt stays pending forever
    Never,
}

/// Observable chain history, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    Sent { nonce: u64, to: String, tx_hash: String },
    Mined { tx_hash: String, success: bool },
}

struct SentTx {
    plan: ReceiptPlan,
}

/// Hash the mock chain assigns to a signed payload.
pub fn mock_tx_hash(raw: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    raw.hash(&mut hasher);
    format!("0x{:064x}", hasher.finish())
}

struct MockState {
    down: bool,
    failures: HashMap<String, VecDeque<RpcError>>,
    accept_then_fail: VecDeque<RpcError>,
    latency: Option<Duration>,
    method_latency: HashMap<String, Duration>,
    calls: HashMap<String, u32>,
    fee_data: FeeData,
    call_results: HashMap<(String, [u8; 4]), Vec<u8>>,
    gas_estimate: u64,
    balance: u128,
    pending_count: u64,
    receipt_plans: HashMap<String, ReceiptPlan>,
    gas_used: u64,
    effective_gas_price: u128,
    sent: HashMap<String, SentTx>,
    events: Vec<ChainEvent>,
}

/// One scripted endpoint.
pub struct MockRpc {
    name: String,
    state: Mutex<MockState>,
}

impl MockRpc {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(MockState {
                down: false,
                failures: HashMap::new(),
                accept_then_fail: VecDeque::new(),
                latency: None,
                method_latency: HashMap::new(),
                calls: HashMap::new(),
                fee_data: FeeData {
                    base_fee_per_gas: 1_000_000_000,
                    suggested_priority_fee: 0,
                },
                call_results: HashMap::new(),
                gas_estimate: 100_000,
                balance: 10u128.pow(20),
                pending_count: 0,
                receipt_plans: HashMap::new(),
                gas_used: 100_000,
                effective_gas_price: 1_000_000_000,
                sent: HashMap::new(),
                events: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Suspends like a network round trip. Without configured latency it still
    /// yields once, so concurrent callers interleave.
    async fn pause(&self, method: &str) {
        let delay = {
            let state = self.state();
            state.method_latency.get(method).copied().or(state.latency)
        };
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
    }

    /// Counts the call and applies scripted failures.
    fn enter(&self, method: &str) -> std::result::Result<MutexGuard<'_, MockState>, RpcError> {
        let mut state = self.state();
        *state.calls.entry(method.to_string()).or_insert(0) += 1;
        if state.down {
            return Err(RpcError::Transient(format!("{} is down", self.name)));
        }
        if let Some(err) = state.failures.get_mut(method).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }

    /// Every call fails with a transient error while down.
    pub fn set_down(&self, down: bool) {
        self.state().down = down;
    }

    pub fn fail_next(&self, method: &str, times: usize, err: RpcError) {
        let mut state = self.state();
        let queue = state.failures.entry(method.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(err.clone());
        }
    }

    /// Records the next broadcast as accepted, then reports `err` to the caller.
    pub fn accept_then_fail_next_send(&self, err: RpcError) {
        self.state().accept_then_fail.push_back(err);
    }

    /// Delay applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Delay for one method, overriding `set_latency`.
    pub fn set_method_latency(&self, method: &str, latency: Duration) {
        self.state().method_latency.insert(method.to_string(), latency);
    }

    pub fn call_count(&self, method: &str) -> u32 {
        self.state().calls.get(method).copied().unwrap_or(0)
    }

    pub fn set_fee_data(&self, base_fee_per_gas: u128, suggested_priority_fee: u128) {
        self.state().fee_data = FeeData {
            base_fee_per_gas,
            suggested_priority_fee,
        };
    }

    pub fn set_pending_reward(&self, target: &Target, raw: u128) {
        let mut word = vec![0u8; 32];
        word[16..].copy_from_slice(&raw.to_be_bytes());
        self.state()
            .call_results
            .insert((target.address.to_lowercase(), target.reward_selector), word);
    }

    pub fn set_gas_estimate(&self, units: u64) {
        self.state().gas_estimate = units;
    }

    pub fn set_balance(&self, wei: u128) {
        self.state().balance = wei;
    }

    pub fn set_pending_count(&self, count: u64) {
        self.state().pending_count = count;
    }

    pub fn set_receipt_plan(&self, to: &str, plan: ReceiptPlan) {
        self.state().receipt_plans.insert(to.to_lowercase(), plan);
    }

    pub fn set_receipt_costs(&self, gas_used: u64, effective_gas_price: u128) {
        let mut state = self.state();
        state.gas_used = gas_used;
        state.effective_gas_price = effective_gas_price;
    }

    pub fn events(&self) -> Vec<ChainEvent> {
        self.state().events.clone()
    }

    /// Nonces of every broadcast transaction, in send order.
    pub fn sent_nonces(&self) -> Vec<u64> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                ChainEvent::Sent { nonce, .. } => Some(*nonce),
                ChainEvent::Mined { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    fn label(&self) -> String {
        self.name.clone()
    }

    async fn get_fee_data(&self) -> std::result::Result<FeeData, RpcError> {
        self.pause("get_fee_data").await;
        Ok(self.enter("get_fee_data")?.fee_data)
    }

    async fn call(&self, to: &str, data: &[u8]) -> std::result::Result<Vec<u8>, RpcError> {
        self.pause("call").await;
        let state = self.enter("call")?;
        let mut selector = [0u8; 4];
        if data.len() >= 4 {
            selector.copy_from_slice(&data[..4]);
        }
        let to = to.to_lowercase();
        if let Some(result) = state.call_results.get(&(to.clone(), selector)) {
            return Ok(result.clone());
        }
        if state.receipt_plans.get(&to) == Some(&ReceiptPlan::Revert) {
            return Err(RpcError::Rejected(
                "execution reverted: nothing to harvest".to_string(),
            ));
        }
        Ok(vec![0u8; 32])
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> std::result::Result<String, RpcError> {
        self.pause("send_raw_transaction").await;
        let mut state = self.enter("send_raw_transaction")?;
        let tx: TxFields = serde_json::from_slice(raw)
            .map_err(|e| RpcError::Rejected(format!("rlp: {}", e)))?;
        let tx_hash = mock_tx_hash(raw);
        if state.sent.contains_key(&tx_hash) {
            return Err(RpcError::AlreadyKnown("already known".to_string()));
        }
        state.pending_count = state.pending_count.max(tx.nonce + 1);
        let plan = state
            .receipt_plans
            .get(&tx.to.to_lowercase())
            .copied()
            .unwrap_or(ReceiptPlan::Success);
        state.sent.insert(tx_hash.clone(), SentTx { plan });
        state.events.push(ChainEvent::Sent {
            nonce: tx.nonce,
            to: tx.to.to_lowercase(),
            tx_hash: tx_hash.clone(),
        });
        match state.accept_then_fail.pop_front() {
            Some(err) => Err(err),
            None => Ok(tx_hash),
        }
    }

    async fn get_receipt(&self, tx_hash: &str) -> std::result::Result<Option<Receipt>, RpcError> {
        self.pause("get_receipt").await;
        let mut state = self.enter("get_receipt")?;
        let plan = match state.sent.get(tx_hash) {
            Some(sent) => sent.plan,
            None => return Ok(None),
        };
        let success = match plan {
            ReceiptPlan::Never => return Ok(None),
            ReceiptPlan::Success => true,
            ReceiptPlan::Revert => false,
        };
        state.events.push(ChainEvent::Mined {
            tx_hash: tx_hash.to_string(),
            success,
        });
        Ok(Some(Receipt {
            tx_hash: tx_hash.to_string(),
            success,
            block_number: 1,
            gas_used: state.gas_used,
            effective_gas_price: state.effective_gas_price,
        }))
    }

    async fn get_transaction_count(&self, _address: &str) -> std::result::Result<u64, RpcError> {
        self.pause("get_transaction_count").await;
        Ok(self.enter("get_transaction_count")?.pending_count)
    }

    async fn get_balance(&self, _address: &str) -> std::result::Result<u128, RpcError> {
        self.pause("get_balance").await;
        Ok(self.enter("get_balance")?.balance)
    }

    async fn estimate_gas(
        &self,
        _from: Option<&str>,
        _to: &str,
        _data: &[u8],
    ) -> std::result::Result<u64, RpcError> {
        self.pause("estimate_gas").await;
        Ok(self.enter("estimate_gas")?.gas_estimate)
    }
}

/// Encodes the unsigned fields as JSON so `MockRpc` can read them back.
#[derive(Default)]
pub struct MockSigner {
    signed: AtomicU32,
    failing: AtomicBool,
    connect_failures: AtomicU32,
}

impl MockSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The next `times` requests fail as if the signer were unreachable.
    pub fn fail_connect_next(&self, times: u32) {
        self.connect_failures.store(times, Ordering::SeqCst);
    }

    pub fn signed_count(&self) -> u32 {
        self.signed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionSigner for MockSigner {
    async fn sign(&self, tx: &TxFields) -> Result<SignedTx> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(JanitorError::SigningError("signer unavailable".to_string()));
        }
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(JanitorError::SigningError("connect/timeout: connection refused".to_string()));
        }
        self.signed.fetch_add(1, Ordering::SeqCst);
        let raw = serde_json::to_vec(tx)?;
        let hash = Some(mock_tx_hash(&raw));
        Ok(SignedTx { raw, hash })
    }
}

/// Fixed reward quotes per target name.
pub struct StaticMarketData {
    quotes: Mutex<HashMap<String, RewardQuote>>,
    gas_units: Mutex<Option<u64>>,
    native_price_usd: f64,
    quote_calls: AtomicU32,
}

impl StaticMarketData {
    pub fn new(native_price_usd: f64) -> Self {
        Self {
            quotes: Mutex::new(HashMap::new()),
            gas_units: Mutex::new(None),
            native_price_usd,
            quote_calls: AtomicU32::new(0),
        }
    }

    /// Quotes `usd` as that many tokens at $1.
    pub fn set_reward_usd(&self, target: &str, usd: f64) {
        self.set_reward(target, usd, 1.0);
    }

    pub fn set_reward(&self, target: &str, pending_tokens: f64, token_price_usd: f64) {
        self.quotes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                target.to_string(),
                RewardQuote {
                    pending_tokens,
                    token_price_usd,
                },
            );
    }

    pub fn clear_reward(&self, target: &str) {
        self.quotes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(target);
    }

    /// Overrides the per-target gas limit used by default.
    pub fn set_gas_units(&self, units: u64) {
        *self.gas_units.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(units);
    }

    pub fn quote_calls(&self) -> u32 {
        self.quote_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketData for StaticMarketData {
    async fn reward_quote(&self, target: &Target) -> Result<RewardQuote> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        self.quotes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&target.name)
            .copied()
            .ok_or_else(|| {
                JanitorError::Rpc(RpcError::Transient(format!("no quote for {}", target.name)))
            })
    }

    async fn gas_units(&self, target: &Target) -> u64 {
        self.gas_units
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .unwrap_or(target.gas_limit)
            .min(target.gas_limit)
    }

    fn native_price_usd(&self) -> f64 {
        self.native_price_usd
    }
}
