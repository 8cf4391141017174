//! Target file loading and validation.
//!
//! The file is JSON with a `chains` map and an ordered `targets` list. Unknown
//! keys are rejected by serde; everything else is checked here, and any
//! problem is fatal at startup.

use crate::error::{JanitorError, Result};
use crate::janitor::fee_estimator::FeeEstimator;
use crate::janitor::target::Target;
use crate::utils::{decode_hex, gwei_to_wei, is_address, is_selector};
use log::{info, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ChainEntry {
    pub chain_id: u64,
    /// Env var names holding endpoint URLs, in failover order
    pub rpc_env_keys: Vec<String>,
    #[serde(default)]
    pub signer_url_env_key: Option<String>,
    #[serde(default)]
    pub from_env_key: Option<String>,
    pub max_fee_gwei: f64,
    pub max_priority_fee_gwei: f64,
    pub native_usd: f64,
    #[serde(default)]
    pub min_native_balance_eth: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TargetEntry {
    pub name: String,
    pub address: String,
    pub chain: String,
    pub enabled: bool,
    pub min_pending_reward_tokens: f64,
    pub call_fee_bps: u32,
    pub cooldown_seconds: u64,
    pub selector: String,
    pub reward_selector: String,
    #[serde(default = "default_decimals")]
    pub reward_token_decimals: u8,
    pub reward_price_usd: f64,
    pub gas_limit: u64,
    #[serde(default)]
    pub profit_multiplier: Option<f64>,
    #[serde(default)]
    pub args: Option<String>,
}

fn default_decimals() -> u8 {
    18
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetFile {
    pub chains: BTreeMap<String, ChainEntry>,
    pub targets: Vec<TargetEntry>,
}

/// A chain after env resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSettings {
    pub name: String,
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub signer_url: Option<String>,
    pub from_address: Option<String>,
    pub fees: FeeEstimator,
    pub native_usd: f64,
    pub min_native_balance_wei: u128,
}

/// Everything the scheduler needs, validated.
#[derive(Debug, Clone)]
pub struct TargetSet {
    pub chains: Vec<ChainSettings>,
    pub targets: Vec<Target>,
}

impl TargetSet {
    pub fn targets_for<'a>(&'a self, chain: &'a str) -> impl Iterator<Item = &'a Target> + 'a {
        self.targets.iter().filter(move |t| t.chain == chain)
    }

    pub fn enabled_count(&self) -> usize {
        self.targets.iter().filter(|t| t.enabled).count()
    }
}

impl TargetFile {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| JanitorError::ConfigError(format!("Malformed target file: {}", e)))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            JanitorError::ConfigError(format!("Cannot read target file {:?}: {}", path, e))
        })?;
        Self::from_json(&raw)
    }

    /// Validates every entry and resolves env references through `lookup`.
    /// All problems are collected and reported together.
    pub fn resolve<F>(self, default_multiplier: f64, lookup: F) -> Result<TargetSet>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut problems: Vec<String> = Vec::new();

        let active_chains: HashSet<&str> = self
            .targets
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.chain.as_str())
            .collect();

        let mut chains = Vec::with_capacity(self.chains.len());
        for (name, entry) in &self.chains {
            if let Some(chain) =
                resolve_chain(name, entry, active_chains.contains(name.as_str()), &lookup, &mut problems)
            {
                chains.push(chain);
            }
        }

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(self.targets.len());
        for entry in &self.targets {
            if !seen.insert(entry.name.clone()) {
                problems.push(format!("duplicate target name '{}'", entry.name));
                continue;
            }
            if !self.chains.contains_key(&entry.chain) {
                problems.push(format!(
                    "target '{}' references unknown chain '{}'",
                    entry.name, entry.chain
                ));
                continue;
            }
            if let Some(target) = resolve_target(entry, default_multiplier, &mut problems) {
                targets.push(target);
            }
        }

        if !problems.is_empty() {
            return Err(JanitorError::ConfigError(problems.join("; ")));
        }

        let set = TargetSet { chains, targets };
        info!(
            "Loaded {} targets ({} enabled) across {} chains",
            set.targets.len(),
            set.enabled_count(),
            set.chains.len()
        );
        Ok(set)
    }
}

fn resolve_chain<F>(
    name: &str,
    entry: &ChainEntry,
    has_enabled_targets: bool,
    lookup: &F,
    problems: &mut Vec<String>,
) -> Option<ChainSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let before = problems.len();

    let mut rpc_urls = Vec::new();
    for key in &entry.rpc_env_keys {
        match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            Some(value) => match url::Url::parse(&value) {
                Ok(_) => rpc_urls.push(value),
                Err(e) => problems.push(format!("chain '{}': {} is not a valid URL: {}", name, key, e)),
            },
            None => warn!("chain '{}': RPC env key {} is not set, skipping", name, key),
        }
    }
    if rpc_urls.is_empty() {
        problems.push(format!("chain '{}' has no resolvable RPC endpoint", name));
    }

    let signer_url = entry
        .signer_url_env_key
        .as_deref()
        .and_then(|key| lookup(key))
        .filter(|v| !v.trim().is_empty());
    if let Some(url) = &signer_url {
        if let Err(e) = url::Url::parse(url) {
            problems.push(format!("chain '{}': signer URL is invalid: {}", name, e));
        }
    }

    let from_address = entry
        .from_env_key
        .as_deref()
        .and_then(|key| lookup(key))
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty());
    if let Some(address) = &from_address {
        if !is_address(address) {
            problems.push(format!("chain '{}': from address '{}' is malformed", name, address));
        }
    }

    if has_enabled_targets {
        if from_address.is_none() {
            problems.push(format!("chain '{}' has enabled targets but no from address", name));
        }
        if signer_url.is_none() {
            problems.push(format!("chain '{}' has enabled targets but no signer URL", name));
        }
    }

    if !(entry.max_fee_gwei > 0.0) || !(entry.max_priority_fee_gwei >= 0.0) {
        problems.push(format!("chain '{}': fee ceilings must be positive", name));
    }
    if !(entry.native_usd > 0.0) {
        problems.push(format!("chain '{}': nativeUsd must be > 0", name));
    }
    if !(entry.min_native_balance_eth >= 0.0) {
        problems.push(format!("chain '{}': minNativeBalanceEth cannot be negative", name));
    }

    if problems.len() > before {
        return None;
    }

    Some(ChainSettings {
        name: name.to_string(),
        chain_id: entry.chain_id,
        rpc_urls,
        signer_url,
        from_address,
        fees: FeeEstimator::new(
            gwei_to_wei(entry.max_fee_gwei),
            gwei_to_wei(entry.max_priority_fee_gwei),
        ),
        native_usd: entry.native_usd,
        min_native_balance_wei: (entry.min_native_balance_eth * 1e18) as u128,
    })
}

fn parse_selector(raw: &str) -> Option<[u8; 4]> {
    if !is_selector(raw) {
        return None;
    }
    let bytes = decode_hex(raw).ok()?;
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&bytes);
    Some(selector)
}

fn resolve_target(
    entry: &TargetEntry,
    default_multiplier: f64,
    problems: &mut Vec<String>,
) -> Option<Target> {
    let before = problems.len();
    let name = &entry.name;

    if name.trim().is_empty() {
        problems.push("target with empty name".to_string());
    }
    if !is_address(&entry.address) {
        problems.push(format!("target '{}': malformed address '{}'", name, entry.address));
    }
    let selector = parse_selector(&entry.selector);
    if selector.is_none() {
        problems.push(format!("target '{}': malformed selector '{}'", name, entry.selector));
    }
    let reward_selector = parse_selector(&entry.reward_selector);
    if reward_selector.is_none() {
        problems.push(format!(
            "target '{}': malformed rewardSelector '{}'",
            name, entry.reward_selector
        ));
    }
    let args = match entry.args.as_deref() {
        None => Vec::new(),
        Some(raw) => match decode_hex(raw) {
            Ok(bytes) if bytes.len() % 32 == 0 => bytes,
            Ok(bytes) => {
                problems.push(format!(
                    "target '{}': args must be whole 32-byte words, got {} bytes",
                    name,
                    bytes.len()
                ));
                Vec::new()
            }
            Err(e) => {
                problems.push(format!("target '{}': {}", name, e));
                Vec::new()
            }
        },
    };
    if entry.call_fee_bps > 10_000 {
        problems.push(format!(
            "target '{}': callFeeBps {} exceeds 10000",
            name, entry.call_fee_bps
        ));
    }
    let profit_multiplier = entry.profit_multiplier.unwrap_or(default_multiplier);
    if !(profit_multiplier > 0.0) {
        problems.push(format!(
            "target '{}': profitMultiplier must be > 0, got {}",
            name, profit_multiplier
        ));
    }
    if !(entry.min_pending_reward_tokens >= 0.0) {
        problems.push(format!("target '{}': minPendingRewardTokens cannot be negative", name));
    }
    if !(entry.reward_price_usd >= 0.0) {
        problems.push(format!("target '{}': rewardPriceUsd cannot be negative", name));
    }
    if entry.gas_limit == 0 {
        problems.push(format!("target '{}': gasLimit must be > 0", name));
    }
    if entry.reward_token_decimals > 36 {
        problems.push(format!(
            "target '{}': rewardTokenDecimals {} is out of range",
            name, entry.reward_token_decimals
        ));
    }
    if entry.cooldown_seconds > i64::MAX as u64 / 1000 {
        problems.push(format!("target '{}': cooldownSeconds is out of range", name));
    }

    if problems.len() > before {
        return None;
    }

    Some(Target {
        name: name.clone(),
        address: entry.address.to_lowercase(),
        chain: entry.chain.clone(),
        selector: selector?,
        reward_selector: reward_selector?,
        args,
        min_pending_reward_tokens: entry.min_pending_reward_tokens,
        reward_token_decimals: entry.reward_token_decimals,
        reward_price_usd: entry.reward_price_usd,
        call_fee_bps: entry.call_fee_bps,
        profit_multiplier,
        cooldown: chrono::Duration::seconds(entry.cooldown_seconds as i64),
        gas_limit: entry.gas_limit,
        enabled: entry.enabled,
    })
}

/// Reads and validates the target file against the process environment.
pub fn load_targets(path: impl AsRef<Path>, default_multiplier: f64) -> Result<TargetSet> {
    TargetFile::from_path(path)?.resolve(default_multiplier, |key| std::env::var(key).ok())
}
