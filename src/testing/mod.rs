//! Test support: scripted collaborators and fixtures shared by unit and
//! integration tests.

pub mod mock_chain;

pub use mock_chain::{mock_tx_hash, ChainEvent, MockRpc, MockSigner, ReceiptPlan, StaticMarketData};

use crate::config::ChainSettings;
use crate::janitor::fee_estimator::FeeEstimator;
use crate::janitor::target::Target;
use chrono::Duration;

pub const SAMPLE_WALLET: &str = "0x00000000000000000000000000000000000000bb";

/// An enabled target on `base` with a 300s cooldown and a 1.5 multiplier.
/// The address is derived from the name so targets stay distinct.
pub fn sample_target(name: &str) -> Target {
    let suffix = name.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    Target {
        name: name.to_string(),
        address: format!("0x{:040x}", suffix),
        chain: "base".to_string(),
        selector: [0x46, 0x41, 0x25, 0x7d],
        reward_selector: [0xf4, 0x0f, 0x0f, 0x52],
        args: Vec::new(),
        min_pending_reward_tokens: 0.0,
        reward_token_decimals: 18,
        reward_price_usd: 1.0,
        call_fee_bps: 50,
        profit_multiplier: 1.5,
        cooldown: Duration::seconds(300),
        gas_limit: 500_000,
        enabled: true,
    }
}

/// A chain where 100k gas at the mock's default 2 gwei max fee costs $10.
pub fn sample_chain(name: &str) -> ChainSettings {
    ChainSettings {
        name: name.to_string(),
        chain_id: 8453,
        rpc_urls: vec!["http://127.0.0.1:8545".to_string()],
        signer_url: Some("http://127.0.0.1:8550".to_string()),
        from_address: Some(SAMPLE_WALLET.to_string()),
        fees: FeeEstimator::new(10_000_000_000, 1_000_000_000),
        native_usd: 50_000.0,
        min_native_balance_wei: 0,
    }
}
