// src/utils/mod.rs
use crate::error::{JanitorError, Result};
use log::info;

pub const WEI_PER_GWEI: u128 = 1_000_000_000;
pub const WEI_PER_ETHER: f64 = 1e18;

pub fn setup_logging(level: log::LevelFilter, log_file: Option<&str>) -> std::result::Result<(), fern::InitError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("reqwest", log::LevelFilter::Warn)
        .level_for("hyper", log::LevelFilter::Warn)
        .chain(std::io::stdout());

    if let Some(path) = log_file {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    info!("Logging initialized at level {}.", level);
    Ok(())
}

pub fn gwei_to_wei(gwei: f64) -> u128 {
    if gwei <= 0.0 {
        return 0;
    }
    (gwei * WEI_PER_GWEI as f64).round() as u128
}

pub fn wei_to_gwei(wei: u128) -> f64 {
    wei as f64 / WEI_PER_GWEI as f64
}

pub fn wei_to_ether(wei: u128) -> f64 {
    wei as f64 / WEI_PER_ETHER
}

/// USD value of `gas_units` priced at `fee_per_gas` wei.
pub fn gas_cost_usd(gas_units: u64, fee_per_gas: u128, native_price_usd: f64) -> f64 {
    wei_to_ether(fee_per_gas.saturating_mul(gas_units as u128)) * native_price_usd
}

/// Shortened address for log lines.
pub fn format_address(address: &str) -> String {
    if address.len() < 10 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

/// Decodes a `0x`-prefixed (or bare) hex string.
pub fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(trimmed).map_err(|e| JanitorError::ParseError(format!("invalid hex '{}': {}", value, e)))
}

pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parses a JSON-RPC quantity (`0x1a`) into a u128.
pub fn parse_quantity(value: &str) -> Result<u128> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    if trimmed.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(trimmed, 16)
        .map_err(|e| JanitorError::ParseError(format!("invalid quantity '{}': {}", value, e)))
}

pub fn to_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

/// Interprets an ABI-encoded uint256 return word, saturating at u128::MAX.
pub fn decode_uint256_word(data: &[u8]) -> Result<u128> {
    if data.len() < 32 {
        return Err(JanitorError::ParseError(format!(
            "expected 32-byte word, got {} bytes",
            data.len()
        )));
    }
    let word = &data[..32];
    if word[..16].iter().any(|b| *b != 0) {
        return Ok(u128::MAX);
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..32]);
    Ok(u128::from_be_bytes(low))
}

pub fn is_address(value: &str) -> bool {
    match value.strip_prefix("0x") {
        Some(body) => body.len() == 40 && body.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

pub fn is_selector(value: &str) -> bool {
    match value.strip_prefix("0x") {
        Some(body) => body.len() == 8 && body.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}
