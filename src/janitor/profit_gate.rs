//! Execute/skip decision comparing reward value against gas cost.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateDecision {
    Execute,
    Skip,
}

/// Thresholds applied by the gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitGate {
    pub multiplier: f64,
    pub min_pending_reward_usd: f64,
    /// Extra floor on `reward - gas`; 0 disables it
    pub min_net_usd: f64,
}

impl ProfitGate {
    pub fn new(multiplier: f64, min_pending_reward_usd: f64) -> Self {
        Self {
            multiplier,
            min_pending_reward_usd,
            min_net_usd: 0.0,
        }
    }

    pub fn with_min_net_usd(mut self, min_net_usd: f64) -> Self {
        self.min_net_usd = min_net_usd;
        self
    }

    pub fn evaluate(&self, pending_reward_usd: f64, estimated_gas_cost_usd: f64) -> GateDecision {
        let decision = evaluate(
            pending_reward_usd,
            estimated_gas_cost_usd,
            self.multiplier,
            self.min_pending_reward_usd,
        );
        if decision == GateDecision::Execute
            && self.min_net_usd > 0.0
            && pending_reward_usd - estimated_gas_cost_usd < self.min_net_usd
        {
            return GateDecision::Skip;
        }
        decision
    }
}

/// EXECUTE iff `reward >= multiplier * gas` and `reward >= threshold`.
/// Both bounds are inclusive. Inputs outside the domain (negative values,
/// non-positive multiplier, NaN) always skip.
pub fn evaluate(
    pending_reward_usd: f64,
    estimated_gas_cost_usd: f64,
    multiplier: f64,
    min_pending_reward_usd: f64,
) -> GateDecision {
    let valid = pending_reward_usd >= 0.0 && estimated_gas_cost_usd >= 0.0 && multiplier > 0.0;
    if !valid {
        return GateDecision::Skip;
    }
    if pending_reward_usd >= multiplier * estimated_gas_cost_usd
        && pending_reward_usd >= min_pending_reward_usd
    {
        GateDecision::Execute
    } else {
        GateDecision::Skip
    }
}
