//! EIP-1559 fee computation with ceiling enforcement.

use crate::error::JanitorError;
use crate::utils::{gas_cost_usd, wei_to_gwei};
use serde::{Deserialize, Serialize};

/// Raw network fee data, in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeData {
    pub base_fee_per_gas: u128,
    pub suggested_priority_fee: u128,
}

/// Bounded fee pair applied to a transaction, in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl FeeQuote {
    /// Worst-case USD cost of `gas_units` at this quote.
    pub fn gas_cost_usd(&self, gas_units: u64, native_price_usd: f64) -> f64 {
        gas_cost_usd(gas_units, self.max_fee_per_gas, native_price_usd)
    }
}

/// Ceilings for one chain, in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimator {
    pub max_fee_ceiling: u128,
    pub max_priority_fee_ceiling: u128,
}

impl FeeEstimator {
    pub fn new(max_fee_ceiling: u128, max_priority_fee_ceiling: u128) -> Self {
        Self {
            max_fee_ceiling,
            max_priority_fee_ceiling,
        }
    }

    /// `maxFee = 2 * baseFee + min(priority, priorityCeiling)`.
    ///
    /// Fails with `GasTooHigh` when the resulting max fee is still above the
    /// chain's ceiling. That is a skip for this cycle, never a breaker failure.
    pub fn estimate(&self, fee_data: FeeData) -> Result<FeeQuote, JanitorError> {
        let priority = fee_data
            .suggested_priority_fee
            .min(self.max_priority_fee_ceiling);
        let max_fee = fee_data
            .base_fee_per_gas
            .saturating_mul(2)
            .saturating_add(priority);

        if max_fee > self.max_fee_ceiling {
            return Err(JanitorError::GasTooHigh {
                max_fee_gwei: wei_to_gwei(max_fee),
                ceiling_gwei: wei_to_gwei(self.max_fee_ceiling),
            });
        }

        Ok(FeeQuote {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
        })
    }
}
