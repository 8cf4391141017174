//! Immutable accounting records written to the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of one evaluation of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    SkipBreakerOpen,
    SkipCooldown,
    SkipGasTooHigh,
    SkipInsufficientReward,
    /// Reward or fee data could not be fetched after retries
    SkipDataUnavailable,
    /// The chain's wallet is halted for insufficient balance (report mode)
    SkipWalletHalted,
    DryRun,
    Executed,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::SkipBreakerOpen => "skip_breaker_open",
            Outcome::SkipCooldown => "skip_cooldown",
            Outcome::SkipGasTooHigh => "skip_gas_too_high",
            Outcome::SkipInsufficientReward => "skip_insufficient_reward",
            Outcome::SkipDataUnavailable => "skip_data_unavailable",
            Outcome::SkipWalletHalted => "skip_wallet_halted",
            Outcome::DryRun => "dry_run",
            Outcome::Executed => "executed",
            Outcome::Failed => "failed",
        }
    }
}

/// Terminal status of a submitted (or refused) transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Confirmed,
    Reverted,
    /// Not included before the inclusion timeout; the nonce stays consumed
    TimedOut,
    RpcError,
    /// Calldata did not match the allowlisted selector; nothing was broadcast
    Refused,
}

impl ExecutionStatus {
    /// Counted against the circuit breaker.
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Reverted | ExecutionStatus::TimedOut | ExecutionStatus::RpcError
        )
    }

    /// Starts the target's cooldown.
    pub fn starts_cooldown(&self) -> bool {
        matches!(self, ExecutionStatus::Confirmed | ExecutionStatus::Reverted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Confirmed => "confirmed",
            ExecutionStatus::Reverted => "reverted",
            ExecutionStatus::TimedOut => "timed_out",
            ExecutionStatus::RpcError => "rpc_error",
            ExecutionStatus::Refused => "refused",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub target: String,
    pub chain: String,
    pub timestamp: DateTime<Utc>,
    pub pending_reward_usd: f64,
    pub estimated_gas_cost_usd: f64,
    pub multiplier: f64,
    pub outcome: Outcome,
    /// Free-form detail, e.g. the cooldown remaining or the fetch error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DecisionRecord {
    pub fn new(
        target: &str,
        chain: &str,
        timestamp: DateTime<Utc>,
        pending_reward_usd: f64,
        estimated_gas_cost_usd: f64,
        multiplier: f64,
        outcome: Outcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.to_string(),
            chain: chain.to_string(),
            timestamp,
            pending_reward_usd,
            estimated_gas_cost_usd,
            multiplier,
            outcome,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub decision_id: Option<Uuid>,
    pub target: String,
    pub chain: String,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: Option<String>,
    pub nonce: Option<u64>,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub gross_reward_usd: f64,
    pub gas_cost_usd: f64,
    pub net_profit_usd: f64,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// A record with no on-chain footprint (refused, or failed before inclusion).
    pub fn without_receipt(
        target: &str,
        chain: &str,
        timestamp: DateTime<Utc>,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            decision_id: None,
            target: target.to_string(),
            chain: chain.to_string(),
            timestamp,
            tx_hash: None,
            nonce: None,
            gas_used: 0,
            effective_gas_price: 0,
            gross_reward_usd: 0.0,
            gas_cost_usd: 0.0,
            net_profit_usd: 0.0,
            status,
            error,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Confirmed
    }
}
