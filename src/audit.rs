//! Append-only screening audit log.
//!
//! One JSON array per day at `<root>/YYYY-MM-DD/audit_YYYY-MM-DD.json`.
//! The load-append-save cycle is serialized through an async mutex so
//! concurrent requests cannot interleave writes to the same day file.
//! Recording is best-effort by contract: an audit failure is logged and
//! swallowed, never failing the request that produced the entry.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, ScreeningError};

/// What kind of screening action produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ScreenAddress,
    ScreenAddressBatch,
    ScreenTransaction,
    ScreenTransactionBatch,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AuditAction::ScreenAddress => "screen_address",
            AuditAction::ScreenAddressBatch => "screen_address_batch",
            AuditAction::ScreenTransaction => "screen_transaction",
            AuditAction::ScreenTransactionBatch => "screen_transaction_batch",
        };
        write!(f, "{label}")
    }
}

/// One audited screening action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub entry_id: String,
    pub action: AuditAction,
    /// Address, `bulk_N_items`, or `tx:<hash>`.
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Sanitized result summary; JSON values keep the wire shape open while
    /// the producing code builds it from typed results.
    pub result: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub processing_time_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, subject: impl Into<String>, correlation_id: &str) -> Self {
        AuditEntry {
            entry_id: Uuid::new_v4().to_string(),
            action,
            subject: subject.into(),
            tx_hash: None,
            result: Map::new(),
            timestamp: Utc::now(),
            correlation_id: correlation_id.to_string(),
            processing_time_ms: 0,
            success: true,
            error: None,
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: &str) -> Self {
        self.tx_hash = Some(tx_hash.to_string());
        self
    }

    pub fn with_result(mut self, key: &str, value: Value) -> Self {
        self.result.insert(key.to_string(), value);
        self
    }

    pub fn with_processing_time(mut self, ms: u64) -> Self {
        self.processing_time_ms = ms;
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Aggregate view over the last N daily files.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub total_logs: u64,
    pub successful_logs: u64,
    pub failed_logs: u64,
    pub action_counts: HashMap<String, u64>,
    pub average_processing_time_ms: f64,
    /// Inclusive `[oldest, newest]` dates scanned.
    pub date_range: (String, String),
}

/// Day-bucketed audit log rooted at a directory.
pub struct AuditLog {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        AuditLog {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Record an entry. Failures are logged and swallowed: audit writes must
    /// never take down the screening request they describe.
    pub async fn record(&self, entry: AuditEntry) {
        let entry_id = entry.entry_id.clone();
        if let Err(e) = self.append(entry).await {
            tracing::error!(entry_id = %entry_id, error = %e, "Failed to write audit entry");
        }
    }

    async fn append(&self, entry: AuditEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let date = entry.timestamp.date_naive();
        let path = self.day_file(date);

        let mut entries = read_day_file(&path).await?;
        entries.push(entry);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let serialized = serde_json::to_vec_pretty(&entries)?;
        tokio::fs::write(&path, serialized).await?;
        Ok(())
    }

    /// Entries for one day; empty when the file does not exist.
    pub async fn by_date(&self, date: NaiveDate) -> Result<Vec<AuditEntry>> {
        read_day_file(&self.day_file(date)).await
    }

    /// Entries sharing a correlation id over the last `days` daily files.
    pub async fn by_correlation_id(&self, correlation_id: &str, days: u32) -> Result<Vec<AuditEntry>> {
        let mut out = Vec::new();
        for date in self.recent_dates(days) {
            let mut entries = self.by_date(date).await?;
            entries.retain(|e| e.correlation_id == correlation_id);
            out.append(&mut entries);
        }
        Ok(out)
    }

    /// Entries whose subject matches `address` case-insensitively over the
    /// last `days` daily files.
    pub async fn by_address(&self, address: &str, days: u32) -> Result<Vec<AuditEntry>> {
        let needle = address.to_lowercase();
        let mut out = Vec::new();
        for date in self.recent_dates(days) {
            let mut entries = self.by_date(date).await?;
            entries.retain(|e| e.subject.to_lowercase() == needle);
            out.append(&mut entries);
        }
        Ok(out)
    }

    /// Roll-up statistics over the last `days` daily files.
    pub async fn stats(&self, days: u32) -> Result<AuditStats> {
        let dates = self.recent_dates(days);
        let newest = dates.first().map(|d| d.to_string()).unwrap_or_default();
        let oldest = dates.last().map(|d| d.to_string()).unwrap_or_default();

        let mut total = 0u64;
        let mut successful = 0u64;
        let mut action_counts: HashMap<String, u64> = HashMap::new();
        let mut processing_sum = 0u64;

        for date in dates {
            for entry in self.by_date(date).await? {
                total += 1;
                if entry.success {
                    successful += 1;
                }
                *action_counts.entry(entry.action.to_string()).or_default() += 1;
                processing_sum += entry.processing_time_ms;
            }
        }

        Ok(AuditStats {
            total_logs: total,
            successful_logs: successful,
            failed_logs: total - successful,
            action_counts,
            average_processing_time_ms: if total == 0 {
                0.0
            } else {
                processing_sum as f64 / total as f64
            },
            date_range: (oldest, newest),
        })
    }

    fn day_file(&self, date: NaiveDate) -> PathBuf {
        let day = date.format("%Y-%m-%d").to_string();
        self.root.join(&day).join(format!("audit_{day}.json"))
    }

    /// Today and the `days − 1` days before it, newest first.
    fn recent_dates(&self, days: u32) -> Vec<NaiveDate> {
        let today = Utc::now().date_naive();
        (0..days.max(1))
            .filter_map(|offset| today.checked_sub_signed(ChronoDuration::days(offset as i64)))
            .collect()
    }
}

async fn read_day_file(path: &Path) -> Result<Vec<AuditEntry>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            ScreeningError::Internal(format!(
                "corrupt audit file {}: {e}",
                path.display()
            ))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(action: AuditAction, subject: &str, correlation_id: &str) -> AuditEntry {
        AuditEntry::new(action, subject, correlation_id)
            .with_result("riskScore", Value::from(75))
            .with_processing_time(12)
    }

    #[tokio::test]
    async fn appends_into_day_bucketed_array() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path());

        log.record(entry(
            AuditAction::ScreenAddress,
            "12QtD5BFwRsdNsAZY76UVE1xyCGNTojH9h",
            "corr-1",
        ))
        .await;
        log.record(entry(AuditAction::ScreenTransaction, "tx:abcd", "corr-2"))
            .await;

        let today = Utc::now().date_naive();
        let day = today.format("%Y-%m-%d").to_string();
        let path = dir.path().join(&day).join(format!("audit_{day}.json"));
        assert!(path.exists());

        let entries = log.by_date(today).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::ScreenAddress);
        assert_eq!(entries[0].result["riskScore"], Value::from(75));
    }

    #[tokio::test]
    async fn missing_day_reads_empty() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path());
        let entries = log
            .by_date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn queries_filter_by_correlation_and_address() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path());
        let address = "12QtD5BFwRsdNsAZY76UVE1xyCGNTojH9h";

        log.record(entry(AuditAction::ScreenAddress, address, "corr-a"))
            .await;
        log.record(entry(AuditAction::ScreenAddress, address, "corr-b"))
            .await;
        log.record(entry(AuditAction::ScreenAddressBatch, "bulk_10_items", "corr-a"))
            .await;

        let by_corr = log.by_correlation_id("corr-a", 7).await.unwrap();
        assert_eq!(by_corr.len(), 2);

        let by_addr = log.by_address(&address.to_uppercase(), 7).await.unwrap();
        assert_eq!(by_addr.len(), 2);
    }

    #[tokio::test]
    async fn stats_roll_up_counts_and_latency() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path());

        log.record(entry(AuditAction::ScreenAddress, "subject", "c1"))
            .await;
        log.record(
            entry(AuditAction::ScreenTransaction, "tx:ff", "c2").failed("indexer unreachable"),
        )
        .await;

        let stats = log.stats(7).await.unwrap();
        assert_eq!(stats.total_logs, 2);
        assert_eq!(stats.successful_logs, 1);
        assert_eq!(stats.failed_logs, 1);
        assert_eq!(stats.action_counts["screen_address"], 1);
        assert_eq!(stats.average_processing_time_ms, 12.0);
    }

    #[tokio::test]
    async fn concurrent_records_all_survive() {
        let dir = TempDir::new().unwrap();
        let log = std::sync::Arc::new(AuditLog::new(dir.path()));

        let mut set = tokio::task::JoinSet::new();
        for i in 0..20 {
            let log = std::sync::Arc::clone(&log);
            set.spawn(async move {
                log.record(entry(
                    AuditAction::ScreenAddress,
                    &format!("subject-{i}"),
                    "corr",
                ))
                .await;
            });
        }
        while set.join_next().await.is_some() {}

        let entries = log.by_date(Utc::now().date_naive()).await.unwrap();
        assert_eq!(entries.len(), 20);
    }
}
