//! JSON-RPC over HTTP with `reqwest`.

use super::{ChainRpc, Receipt};
use crate::error::RpcError;
use crate::janitor::fee_estimator::FeeData;
use crate::utils::{decode_hex, encode_hex, gwei_to_wei, parse_quantity};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Used when the node does not implement `eth_maxPriorityFeePerGas`.
const FALLBACK_PRIORITY_FEE_GWEI: f64 = 0.05;

/// `Error(string)` selector used by Solidity reverts.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Bare JSON-RPC request plumbing shared by the node client and the signer.
pub(crate) struct JsonRpcTransport {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    pub(crate) fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transient(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let value = self.request_value(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::Decode(format!("{}: unexpected result shape: {}", method, e)))
    }

    pub(crate) async fn request_value(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        debug!("-> {} {} (id {})", self.url, method, id);

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transient(format!("{}: {}", method, e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RpcError::RateLimited);
        }
        if status.is_server_error() {
            return Err(RpcError::Transient(format!("{}: HTTP {}", method, status)));
        }
        if !status.is_success() {
            return Err(RpcError::Rejected(format!("{}: HTTP {}", method, status)));
        }

        let parsed: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Decode(format!("{}: {}", method, e)))?;

        if let Some(err) = parsed.error {
            return Err(classify_rpc_error(err.code, &err.message, err.data.as_ref()));
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

/// Maps a JSON-RPC error object to the retry taxonomy.
pub(crate) fn classify_rpc_error(code: i64, message: &str, data: Option<&Value>) -> RpcError {
    let lower = message.to_lowercase();
    if lower.contains("insufficient funds") {
        return RpcError::InsufficientFunds(message.to_string());
    }
    if lower.contains("already known") || lower.contains("known transaction") || lower.contains("already imported") {
        return RpcError::AlreadyKnown(message.to_string());
    }
    if lower.contains("nonce too low")
        || lower.contains("nonce too high")
        || lower.contains("invalid nonce")
        || lower.contains("replacement transaction underpriced")
    {
        return RpcError::Nonce(message.to_string());
    }
    if code == -32005 || lower.contains("rate limit") || lower.contains("too many requests") {
        return RpcError::RateLimited;
    }
    if lower.contains("timeout") || lower.contains("header not found")
        || (code == -32603 && lower.contains("internal")) {
        return RpcError::Transient(message.to_string());
    }

    let reason = data
        .and_then(Value::as_str)
        .and_then(|raw| decode_hex(raw).ok())
        .and_then(|bytes| decode_revert_reason(&bytes));
    match reason {
        Some(reason) => RpcError::Rejected(format!("{}: {}", message, reason)),
        None => RpcError::Rejected(message.to_string()),
    }
}

/// Decodes ABI `Error(string)` revert data.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 68 || data[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    let body = &data[4..];
    let len_word = &body[32..64];
    if len_word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&len_word[24..32]);
    let len = u64::from_be_bytes(len_bytes) as usize;
    let text = body.get(64..64 + len)?;
    String::from_utf8(text.to_vec()).ok()
}

fn quantity_field(value: &Value, field: &str) -> Result<u128, RpcError> {
    let raw = value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::Decode(format!("missing field {}", field)))?;
    parse_quantity(raw).map_err(|e| RpcError::Decode(e.to_string()))
}

fn quantity(value: &Value) -> Result<u128, RpcError> {
    let raw = value
        .as_str()
        .ok_or_else(|| RpcError::Decode(format!("expected hex quantity, got {}", value)))?;
    parse_quantity(raw).map_err(|e| RpcError::Decode(e.to_string()))
}

pub(crate) fn parse_receipt(value: &Value) -> Result<Receipt, RpcError> {
    let tx_hash = value
        .get("transactionHash")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::Decode("receipt without transactionHash".to_string()))?
        .to_string();
    Ok(Receipt {
        tx_hash,
        success: quantity_field(value, "status")? == 1,
        block_number: quantity_field(value, "blockNumber")? as u64,
        gas_used: quantity_field(value, "gasUsed")? as u64,
        // Pre-London nodes omit effectiveGasPrice.
        effective_gas_price: quantity_field(value, "effectiveGasPrice").unwrap_or(0),
    })
}

pub struct HttpRpcClient {
    transport: JsonRpcTransport,
}

impl HttpRpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        Ok(Self {
            transport: JsonRpcTransport::new(url, timeout)?,
        })
    }
}

#[async_trait]
impl ChainRpc for HttpRpcClient {
    fn label(&self) -> String {
        url::Url::parse(self.transport.url())
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "rpc".to_string())
    }

    async fn get_fee_data(&self) -> Result<FeeData, RpcError> {
        let block: Value = self
            .transport
            .request_value("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let base_fee_per_gas = quantity_field(&block, "baseFeePerGas")?;

        let suggested_priority_fee = match self
            .transport
            .request_value("eth_maxPriorityFeePerGas", json!([]))
            .await
        {
            Ok(value) => quantity(&value)?,
            Err(RpcError::Rejected(msg)) => {
                debug!("eth_maxPriorityFeePerGas unsupported ({}), using default tip", msg);
                gwei_to_wei(FALLBACK_PRIORITY_FEE_GWEI)
            }
            Err(e) => return Err(e),
        };

        Ok(FeeData {
            base_fee_per_gas,
            suggested_priority_fee,
        })
    }

    async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let result: String = self
            .transport
            .request("eth_call", json!([{ "to": to, "data": encode_hex(data) }, "latest"]))
            .await?;
        decode_hex(&result).map_err(|e| RpcError::Decode(e.to_string()))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError> {
        self.transport
            .request("eth_sendRawTransaction", json!([encode_hex(raw)]))
            .await
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, RpcError> {
        let value = self
            .transport
            .request_value("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        parse_receipt(&value).map(Some)
    }

    async fn get_transaction_count(&self, address: &str) -> Result<u64, RpcError> {
        let value = self
            .transport
            .request_value("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        Ok(quantity(&value)? as u64)
    }

    async fn get_balance(&self, address: &str) -> Result<u128, RpcError> {
        let value = self
            .transport
            .request_value("eth_getBalance", json!([address, "latest"]))
            .await?;
        quantity(&value)
    }

    async fn estimate_gas(&self, from: Option<&str>, to: &str, data: &[u8]) -> Result<u64, RpcError> {
        let mut call = json!({ "to": to, "data": encode_hex(data) });
        if let Some(from) = from {
            call["from"] = json!(from);
        }
        let value = self.transport.request_value("eth_estimateGas", json!([call])).await?;
        Ok(quantity(&value)? as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn revert_data(reason: &str) -> Vec<u8> {
        let mut data = ERROR_STRING_SELECTOR.to_vec();
        let mut offset = [0u8; 32];
        offset[31] = 0x20;
        data.extend_from_slice(&offset);
        let mut len = [0u8; 32];
        len[31] = reason.len() as u8;
        data.extend_from_slice(&len);
        let mut text = reason.as_bytes().to_vec();
        text.resize(32, 0);
        data.extend_from_slice(&text);
        data
    }

    #[test]
    fn classifies_node_errors() {
        assert!(matches!(
            classify_rpc_error(-32000, "insufficient funds for gas * price + value", None),
            RpcError::InsufficientFunds(_)
        ));
        assert!(matches!(
            classify_rpc_error(-32000, "nonce too low", None),
            RpcError::Nonce(_)
        ));
        assert!(matches!(
            classify_rpc_error(-32000, "already known", None),
            RpcError::AlreadyKnown(_)
        ));
        assert_eq!(classify_rpc_error(-32005, "limit exceeded", None), RpcError::RateLimited);
        assert!(classify_rpc_error(-32000, "request timeout", None).is_transient());
        assert!(!classify_rpc_error(3, "execution reverted", None).is_transient());
    }

    #[test]
    fn decodes_revert_reason_from_error_data() {
        let data = json!(encode_hex(&revert_data("nothing to harvest")));
        assert_eq!(
            classify_rpc_error(3, "execution reverted", Some(&data)),
            RpcError::Rejected("execution reverted: nothing to harvest".to_string())
        );
        assert_eq!(decode_revert_reason(&[0u8; 10]), None);
    }

    #[test]
    fn parses_receipts() {
        let receipt = parse_receipt(&json!({
            "transactionHash": "0xabc",
            "status": "0x0",
            "blockNumber": "0x10",
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x3b9aca00"
        }))
        .unwrap();
        assert_eq!(
            receipt,
            Receipt {
                tx_hash: "0xabc".to_string(),
                success: false,
                block_number: 16,
                gas_used: 21_000,
                effective_gas_price: 1_000_000_000,
            }
        );
    }
}
