//! Per-chain wallet context: the submission lock, nonce sequencing, the
//! pending-transaction set and the balance halt flag.

use crate::error::{JanitorError, Result};
use crate::rpc::ChainRpc;
use crate::utils::{format_address, wei_to_ether};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub struct PendingTx {
    pub tx_hash: String,
    pub target: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct NonceState {
    /// Next nonce this process would use; `None` forces a resync from chain
    next_nonce: Option<u64>,
    pending: BTreeMap<u64, PendingTx>,
}

pub struct WalletContext {
    chain: String,
    address: String,
    min_balance_wei: u128,
    state: Mutex<NonceState>,
    halted: AtomicBool,
    /// Balance needed before a halted wallet may submit again
    resume_floor_wei: std::sync::Mutex<u128>,
}

impl WalletContext {
    pub fn new(chain: &str, address: &str, min_balance_wei: u128) -> Self {
        Self {
            chain: chain.to_string(),
            address: address.to_lowercase(),
            min_balance_wei,
            state: Mutex::new(NonceState::default()),
            halted: AtomicBool::new(false),
            resume_floor_wei: std::sync::Mutex::new(min_balance_wei),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Stops further submissions until the balance covers `required_wei`
    /// plus the configured floor again.
    pub fn halt(&self, reason: &str, required_wei: u128) {
        *self
            .resume_floor_wei
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = required_wei.saturating_add(self.min_balance_wei);
        if !self.halted.swap(true, Ordering::SeqCst) {
            error!(
                "[{}] wallet {} HALTED: {}. Evaluation continues in report mode.",
                self.chain,
                format_address(&self.address),
                reason
            );
        }
    }

    /// Lifts a halt once the balance is back above the amount that was missing.
    /// Returns whether the wallet may submit.
    pub async fn try_resume(&self, rpc: &dyn ChainRpc) -> Result<bool> {
        if !self.is_halted() {
            return Ok(true);
        }
        let balance = rpc.get_balance(&self.address).await?;
        let floor = *self
            .resume_floor_wei
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if balance < floor {
            debug!(
                "[{}] balance {:.6} still below {:.6}",
                self.chain,
                wei_to_ether(balance),
                wei_to_ether(floor)
            );
            return Ok(false);
        }
        self.halted.store(false, Ordering::SeqCst);
        info!(
            "[{}] wallet {} balance recovered ({:.6}), resuming submissions",
            self.chain,
            format_address(&self.address),
            wei_to_ether(balance)
        );
        Ok(true)
    }

    /// Exclusive submission session. Held from nonce reservation until the
    /// transaction reaches a terminal status.
    pub async fn lock(&self) -> WalletSession<'_> {
        let state = self.state.lock().await;
        debug!("[{}] wallet lock acquired", self.chain);
        WalletSession {
            wallet: self,
            state,
        }
    }

    /// Balance must cover `required_wei` plus the configured floor. Halts the
    /// wallet when it does not.
    pub async fn ensure_balance(&self, rpc: &dyn ChainRpc, required_wei: u128) -> Result<u128> {
        let balance = rpc.get_balance(&self.address).await?;
        let needed = required_wei.saturating_add(self.min_balance_wei);
        if balance < needed {
            let reason = format!(
                "balance {:.6} below required {:.6}",
                wei_to_ether(balance),
                wei_to_ether(needed)
            );
            self.halt(&reason, required_wei);
            return Err(JanitorError::InsufficientBalance(reason));
        }
        debug!(
            "[{}] wallet balance {:.6} covers {:.6}",
            self.chain,
            wei_to_ether(balance),
            wei_to_ether(needed)
        );
        Ok(balance)
    }

    pub async fn pending(&self) -> Vec<(u64, PendingTx)> {
        self.state
            .lock()
            .await
            .pending
            .iter()
            .map(|(nonce, tx)| (*nonce, tx.clone()))
            .collect()
    }
}

pub struct WalletSession<'a> {
    wallet: &'a WalletContext,
    state: MutexGuard<'a, NonceState>,
}

impl<'a> WalletSession<'a> {
    /// `max(chain pending count, local next)`; advances the local counter.
    pub async fn reserve_nonce(&mut self, rpc: &dyn ChainRpc) -> Result<u64> {
        let on_chain = rpc.get_transaction_count(&self.wallet.address).await?;
        let nonce = match self.state.next_nonce {
            Some(local) if local > on_chain => {
                debug!(
                    "[{}] local nonce {} ahead of chain {}",
                    self.wallet.chain, local, on_chain
                );
                local
            }
            _ => on_chain,
        };
        self.state.next_nonce = Some(nonce + 1);
        Ok(nonce)
    }

    /// The broadcast never reached the chain; the nonce can be reused.
    pub fn release(&mut self, nonce: u64) {
        if self.state.next_nonce == Some(nonce + 1) {
            self.state.next_nonce = Some(nonce);
        }
    }

    /// Drops local nonce knowledge after a nonce conflict.
    pub fn resync(&mut self) {
        warn!("[{}] nonce conflict, resyncing from chain", self.wallet.chain);
        self.state.next_nonce = None;
    }

    pub fn track_pending(&mut self, nonce: u64, tx_hash: &str, target: &str) {
        self.state.pending.insert(
            nonce,
            PendingTx {
                tx_hash: tx_hash.to_string(),
                target: target.to_string(),
                submitted_at: Utc::now(),
            },
        );
    }

    /// Terminal receipt observed; the nonce stays consumed.
    pub fn settle(&mut self, nonce: u64) {
        self.state.pending.remove(&nonce);
    }

    /// Clears pending entries that have since been mined. Timed-out
    /// transactions stay tracked until this sees their receipt.
    pub async fn reconcile(&mut self, rpc: &dyn ChainRpc) {
        let hashes: Vec<(u64, String)> = self
            .state
            .pending
            .iter()
            .map(|(nonce, tx)| (*nonce, tx.tx_hash.clone()))
            .collect();
        for (nonce, hash) in hashes {
            match rpc.get_receipt(&hash).await {
                Ok(Some(receipt)) => {
                    info!(
                        "[{}] earlier tx {} (nonce {}) mined, success={}",
                        self.wallet.chain, hash, nonce, receipt.success
                    );
                    self.state.pending.remove(&nonce);
                }
                Ok(None) => debug!("[{}] tx {} (nonce {}) still pending", self.wallet.chain, hash, nonce),
                Err(e) => debug!("[{}] receipt lookup for {} failed: {}", self.wallet.chain, hash, e),
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.state.pending.len()
    }
}

impl Drop for WalletSession<'_> {
    fn drop(&mut self) {
        debug!("[{}] wallet lock released", self.wallet.chain);
    }
}
