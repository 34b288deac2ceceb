//! LLM usage telemetry
//!
//! Records land in `telemetry/usage.json`, capped to the last 1000 calls on
//! each write. Rollups aggregate per UTC day. Writes are serialized through
//! a mutex; record failures are the caller's to log, never fatal.

use crate::kv::write_json_atomic;
use forge_core::{ForgeResult, StoreError, TelemetryRecord};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Cap on retained call records.
const MAX_RECORDS: usize = 1000;

/// Per-day aggregate.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DayRollup {
    /// UTC day in `YYYY-MM-DD` form.
    pub day: String,
    pub calls: u64,
    pub in_tokens: u64,
    pub out_tokens: u64,
    pub cost_est: f64,
    pub failures: u64,
}

/// All-time totals over the retained window.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TelemetryTotals {
    pub calls: u64,
    pub in_tokens: u64,
    pub out_tokens: u64,
    pub cost_est: f64,
    pub failures: u64,
}

/// Persistent usage log.
pub struct Telemetry {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl Telemetry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join("telemetry").join("usage.json"),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Append a record, enforcing the retention cap.
    pub async fn record(&self, record: TelemetryRecord) -> ForgeResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;
        records.push(record);
        if records.len() > MAX_RECORDS {
            let excess = records.len() - MAX_RECORDS;
            records.drain(..excess);
        }
        let value = serde_json::to_value(&records).map_err(|e| StoreError::SerializeFailed {
            reason: e.to_string(),
        })?;
        write_json_atomic(&self.path, &value).await
    }

    /// All retained records, oldest first.
    pub async fn read_all(&self) -> ForgeResult<Vec<TelemetryRecord>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::ReadFailed {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        };
        Ok(serde_json::from_str(&text).unwrap_or_default())
    }

    /// Per-day aggregates, day-ascending.
    pub async fn rollups(&self) -> ForgeResult<Vec<DayRollup>> {
        let records = self.read_all().await?;
        let mut by_day: std::collections::BTreeMap<String, DayRollup> =
            std::collections::BTreeMap::new();
        for record in &records {
            let day = record.at.format("%Y-%m-%d").to_string();
            let rollup = by_day.entry(day.clone()).or_insert_with(|| DayRollup {
                day,
                calls: 0,
                in_tokens: 0,
                out_tokens: 0,
                cost_est: 0.0,
                failures: 0,
            });
            rollup.calls += 1;
            rollup.in_tokens += record.in_tokens;
            rollup.out_tokens += record.out_tokens;
            rollup.cost_est += record.cost_est;
            if !record.success {
                rollup.failures += 1;
            }
        }
        Ok(by_day.into_values().collect())
    }

    /// Totals over the retained window.
    pub async fn totals(&self) -> ForgeResult<TelemetryTotals> {
        let records = self.read_all().await?;
        let mut totals = TelemetryTotals {
            calls: 0,
            in_tokens: 0,
            out_tokens: 0,
            cost_est: 0.0,
            failures: 0,
        };
        for record in &records {
            totals.calls += 1;
            totals.in_tokens += record.in_tokens;
            totals.out_tokens += record.out_tokens;
            totals.cost_est += record.cost_est;
            if !record.success {
                totals.failures += 1;
            }
        }
        Ok(totals)
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").field("path", &self.path).finish()
    }
}
