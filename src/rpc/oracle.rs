//! Reward and gas inputs for the profit gate.

use super::ChainRpc;
use crate::error::Result;
use crate::janitor::target::Target;
use crate::utils::decode_uint256_word;
use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use std::sync::Arc;

/// Headroom applied on top of `eth_estimateGas`.
pub const GAS_ESTIMATE_BUFFER: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RewardQuote {
    pub pending_tokens: f64,
    pub token_price_usd: f64,
}

impl RewardQuote {
    pub fn usd(&self) -> f64 {
        self.pending_tokens * self.token_price_usd
    }
}

#[async_trait]
pub trait MarketData: Send + Sync {
    async fn reward_quote(&self, target: &Target) -> Result<RewardQuote>;

    /// Gas units to budget for the maintenance call. Never exceeds the
    /// target's gas limit.
    async fn gas_units(&self, target: &Target) -> u64;

    fn native_price_usd(&self) -> f64;
}

/// Reads pending rewards straight from the target contract.
pub struct OnChainMarketData {
    rpc: Arc<dyn ChainRpc>,
    from: Option<String>,
    native_usd: f64,
}

impl OnChainMarketData {
    pub fn new(rpc: Arc<dyn ChainRpc>, from: Option<String>, native_usd: f64) -> Self {
        Self { rpc, from, native_usd }
    }
}

pub fn scale_amount(raw: u128, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

pub fn buffered_gas(estimate: u64, gas_limit: u64) -> u64 {
    ((estimate as f64 * GAS_ESTIMATE_BUFFER).ceil() as u64).min(gas_limit)
}

#[async_trait]
impl MarketData for OnChainMarketData {
    async fn reward_quote(&self, target: &Target) -> Result<RewardQuote> {
        let data = self.rpc.call(&target.address, &target.reward_selector).await?;
        let raw = decode_uint256_word(&data)?;
        let pending_tokens = scale_amount(raw, target.reward_token_decimals);
        debug!(
            "[{}] pending reward {:.6} tokens (${:.4})",
            target.name,
            pending_tokens,
            pending_tokens * target.reward_price_usd
        );
        Ok(RewardQuote {
            pending_tokens,
            token_price_usd: target.reward_price_usd,
        })
    }

    async fn gas_units(&self, target: &Target) -> u64 {
        match self
            .rpc
            .estimate_gas(self.from.as_deref(), &target.address, &target.calldata())
            .await
        {
            Ok(estimate) => buffered_gas(estimate, target.gas_limit),
            Err(e) => {
                debug!("[{}] gas estimate failed ({}), using gasLimit", target.name, e);
                target.gas_limit
            }
        }
    }

    fn native_price_usd(&self) -> f64 {
        self.native_usd
    }
}
