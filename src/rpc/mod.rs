//! Chain-facing collaborators: JSON-RPC access, signing and market data.
//!
//! The decision core only sees the traits defined here; concrete clients are
//! wired by the binary.

pub mod failover;
pub mod http;
pub mod oracle;
pub mod signer;

pub use failover::FailoverRpc;
pub use http::HttpRpcClient;
pub use oracle::{MarketData, OnChainMarketData, RewardQuote};
pub use signer::{RemoteSigner, SignedTx, TransactionSigner};

use crate::error::RpcError;
use crate::janitor::fee_estimator::FeeData;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Mined transaction outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: String,
    pub success: bool,
    pub block_number: u64,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

/// Unsigned EIP-1559 transaction handed to the signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxFields {
    pub chain_id: u64,
    pub from: String,
    pub to: String,
    pub nonce: u64,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub value: u128,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// One chain's RPC surface. Implementations are bound to a single chain.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Human-readable endpoint label for logs
    fn label(&self) -> String;

    async fn get_fee_data(&self) -> Result<FeeData, RpcError>;

    /// Read-only `eth_call` against the latest block.
    async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, RpcError>;

    /// Returns the transaction hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError>;

    /// `None` while the transaction is still pending.
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, RpcError>;

    /// Pending-block transaction count for `address`.
    async fn get_transaction_count(&self, address: &str) -> Result<u64, RpcError>;

    async fn get_balance(&self, address: &str) -> Result<u128, RpcError>;

    async fn estimate_gas(&self, from: Option<&str>, to: &str, data: &[u8]) -> Result<u64, RpcError>;
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&crate::utils::encode_hex(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        crate::utils::decode_hex(&raw).map_err(serde::de::Error::custom)
    }
}
