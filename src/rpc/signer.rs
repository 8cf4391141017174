//! Transaction signing collaborators. Key material never enters this process.

use super::http::JsonRpcTransport;
use super::TxFields;
use crate::error::{JanitorError, Result, RpcError};
use crate::utils::{decode_hex, encode_hex, to_quantity};
use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};
use std::time::Duration;

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTx {
    pub raw: Vec<u8>,
    /// Transaction hash when the signer reports it
    pub hash: Option<String>,
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, tx: &TxFields) -> Result<SignedTx>;
}

/// Delegates to an external signer over `eth_signTransaction`
/// (Clef, web3signer, or a node with an unlocked account).
pub struct RemoteSigner {
    transport: JsonRpcTransport,
}

impl RemoteSigner {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let transport = JsonRpcTransport::new(url, timeout)
            .map_err(|e| JanitorError::SigningError(e.to_string()))?;
        Ok(Self { transport })
    }
}

pub(crate) fn sign_request(tx: &TxFields) -> Value {
    json!({
        "type": "0x2",
        "chainId": to_quantity(tx.chain_id as u128),
        "from": tx.from,
        "to": tx.to,
        "nonce": to_quantity(tx.nonce as u128),
        "gas": to_quantity(tx.gas_limit as u128),
        "maxFeePerGas": to_quantity(tx.max_fee_per_gas),
        "maxPriorityFeePerGas": to_quantity(tx.max_priority_fee_per_gas),
        "value": to_quantity(tx.value),
        "data": encode_hex(&tx.data),
    })
}

/// Geth returns `{ raw, tx: { hash, .. } }`; other signers return the raw hex directly.
pub(crate) fn extract_signed(result: &Value) -> Result<SignedTx> {
    let (raw, hash) = match result {
        Value::String(raw) => (raw.as_str(), None),
        Value::Object(map) => {
            let raw = map
                .get("raw")
                .and_then(Value::as_str)
                .ok_or_else(|| JanitorError::SigningError("signer response without raw".to_string()))?;
            let hash = map
                .get("tx")
                .and_then(|tx| tx.get("hash"))
                .and_then(Value::as_str)
                .map(str::to_lowercase);
            (raw, hash)
        }
        other => {
            return Err(JanitorError::SigningError(format!(
                "unexpected signer response: {}",
                other
            )))
        }
    };
    let raw = decode_hex(raw).map_err(|e| JanitorError::SigningError(e.to_string()))?;
    Ok(SignedTx { raw, hash })
}

#[async_trait]
impl TransactionSigner for RemoteSigner {
    async fn sign(&self, tx: &TxFields) -> Result<SignedTx> {
        debug!("Requesting signature for nonce {} to {}", tx.nonce, tx.to);
        let result = self
            .transport
            .request_value("eth_signTransaction", json!([sign_request(tx)]))
            .await
            .map_err(|e| match e {
                RpcError::Transient(msg) => JanitorError::SigningError(format!("connect/timeout: {}", msg)),
                other => JanitorError::SigningError(other.to_string()),
            })?;
        extract_signed(&result)
    }
}
