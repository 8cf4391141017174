//! Append-only accounting store for decisions and executions.
//!
//! The core treats appends as fire-and-forget: a ledger error is logged by the
//! caller and never aborts a cycle. Implementations must tolerate concurrent
//! appends from several chain loops.

use crate::error::{JanitorError, Result};
use crate::janitor::records::{DecisionRecord, ExecutionRecord};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn append_decision(&self, record: &DecisionRecord) -> Result<()>;
    async fn append_execution(&self, record: &ExecutionRecord) -> Result<()>;
}

/// One line of the JSON-lines ledger file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEntry {
    Decision(DecisionRecord),
    Execution(ExecutionRecord),
}

/// JSON-lines file ledger; one entry per line, never rewritten.
pub struct JsonlLedger {
    path: PathBuf,
    file: Arc<tokio::sync::Mutex<tokio::fs::File>>,
}

impl JsonlLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                JanitorError::LedgerError(format!("Failed to open ledger {:?}: {}", path, e))
            })?;
        Ok(Self {
            path,
            file: Arc::new(tokio::sync::Mutex::new(tokio::fs::File::from_std(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: LedgerEntry) -> Result<()> {
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| JanitorError::LedgerError(format!("Failed to write ledger entry: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| JanitorError::LedgerError(format!("Failed to flush ledger: {}", e)))
    }

    /// Reads every entry back, skipping nothing: a malformed line is an error.
    pub fn read_entries(path: impl AsRef<Path>) -> Result<Vec<LedgerEntry>> {
        let file = File::open(path.as_ref())?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl Ledger for JsonlLedger {
    async fn append_decision(&self, record: &DecisionRecord) -> Result<()> {
        debug!(
            "ledger: decision {} for {} -> {}",
            record.id,
            record.target,
            record.outcome.as_str()
        );
        self.append(LedgerEntry::Decision(record.clone())).await
    }

    async fn append_execution(&self, record: &ExecutionRecord) -> Result<()> {
        debug!(
            "ledger: execution {} for {} -> {}",
            record.id,
            record.target,
            record.status.as_str()
        );
        self.append(LedgerEntry::Execution(record.clone())).await
    }
}

/// In-process ledger, handy for dry runs and tests.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn decisions(&self) -> Vec<DecisionRecord> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                LedgerEntry::Decision(d) => Some(d),
                LedgerEntry::Execution(_) => None,
            })
            .collect()
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                LedgerEntry::Execution(e) => Some(e),
                LedgerEntry::Decision(_) => None,
            })
            .collect()
    }

    fn push(&self, entry: LedgerEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| JanitorError::LedgerError("memory ledger lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn append_decision(&self, record: &DecisionRecord) -> Result<()> {
        self.push(LedgerEntry::Decision(record.clone()))
    }

    async fn append_execution(&self, record: &ExecutionRecord) -> Result<()> {
        self.push(LedgerEntry::Execution(record.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::janitor::records::{ExecutionStatus, Outcome};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vault-janitor-{}-{}.jsonl", name, uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn jsonl_ledger_appends_and_reads_back() {
        let path = temp_path("roundtrip");
        let ledger = JsonlLedger::open(&path).unwrap();
        let decision =
            DecisionRecord::new("vault", "base", Utc::now(), 20.0, 10.0, 1.5, Outcome::Executed);
        let mut execution = ExecutionRecord::without_receipt(
            "vault",
            "base",
            Utc::now(),
            ExecutionStatus::TimedOut,
            Some("not included".to_string()),
        );
        execution.decision_id = Some(decision.id);

        ledger.append_decision(&decision).await.unwrap();
        ledger.append_execution(&execution).await.unwrap();

        let entries = JsonlLedger::read_entries(&path).unwrap();
        assert_eq!(
            entries,
            vec![LedgerEntry::Decision(decision), LedgerEntry::Execution(execution)]
        );
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn concurrent_appends_keep_every_line_intact() {
        let path = temp_path("concurrent");
        let ledger = Arc::new(JsonlLedger::open(&path).unwrap());
        let mut handles = Vec::new();
        for chain in ["base", "arbitrum", "optimism", "mainnet"] {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    let record = DecisionRecord::new(
                        &format!("t{}", i),
                        chain,
                        Utc::now(),
                        1.0,
                        1.0,
                        1.5,
                        Outcome::SkipInsufficientReward,
                    );
                    ledger.append_decision(&record).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(JsonlLedger::read_entries(&path).unwrap().len(), 100);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn memory_ledger_splits_by_kind() {
        let ledger = MemoryLedger::new();
        let decision =
            DecisionRecord::new("vault", "base", Utc::now(), 1.0, 1.0, 1.5, Outcome::SkipCooldown);
        ledger.append_decision(&decision).await.unwrap();
        assert_eq!(ledger.decisions().len(), 1);
        assert!(ledger.executions().is_empty());
    }
}
