//! Run history: append-only metadata plus separately stored artifacts
//!
//! Metadata lives in the `history` collection, the generated HTML in
//! `artifacts`, both keyed by the same id. Deleting an entry removes both
//! sides. Listing is newest-first.

use crate::kv::KvStore;
use forge_core::{ForgeResult, Grade, HistoryEntry, StoreError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

const META_COLLECTION: &str = "history";
const CODE_COLLECTION: &str = "artifacts";

/// Filters for [`History::list`].
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub provider: Option<String>,
    pub min_grade: Option<Grade>,
    pub limit: Option<usize>,
}

/// Aggregate statistics over the whole history.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HistoryStats {
    pub total: usize,
    pub by_provider: HashMap<String, u64>,
    pub by_grade: HashMap<String, u64>,
    pub mean_conatus: f64,
    pub mean_ratio: f64,
    pub mean_laetitia: f64,
    pub mean_natura: f64,
}

/// Append-only record of pipeline runs.
pub struct History {
    kv: Arc<KvStore>,
}

impl History {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// Record an entry and its HTML artifact under the entry's id.
    pub async fn record(&self, entry: &HistoryEntry, html: &str) -> ForgeResult<String> {
        let meta = serde_json::to_value(entry).map_err(|e| StoreError::SerializeFailed {
            reason: e.to_string(),
        })?;
        self.kv.set(META_COLLECTION, &entry.id, meta).await?;
        self.kv
            .set(CODE_COLLECTION, &entry.id, json!(html))
            .await?;
        Ok(entry.id.clone())
    }

    /// Fetch the metadata for one run.
    pub async fn get(&self, id: &str) -> ForgeResult<Option<HistoryEntry>> {
        match self.kv.get(META_COLLECTION, id).await? {
            Some(value) => Ok(serde_json::from_value(value).ok()),
            None => Ok(None),
        }
    }

    /// Fetch the HTML artifact for one run.
    pub async fn get_code(&self, id: &str) -> ForgeResult<Option<String>> {
        Ok(self
            .kv
            .get(CODE_COLLECTION, id)
            .await?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    /// List entries newest-first, optionally filtered.
    pub async fn list(&self, filter: &HistoryFilter) -> ForgeResult<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = self
            .kv
            .all(META_COLLECTION)
            .await?
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_value(v).ok())
            .collect();

        if let Some(provider) = &filter.provider {
            entries.retain(|e| &e.provider == provider);
        }
        if let Some(min_grade) = filter.min_grade {
            entries.retain(|e| e.grade >= min_grade);
        }
        entries.sort_by(|a, b| b.at.cmp(&a.at));
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Case-insensitive substring search over prompt text and tags.
    pub async fn search(&self, query: &str) -> ForgeResult<Vec<HistoryEntry>> {
        let needle = query.to_lowercase();
        let mut entries: Vec<HistoryEntry> = self
            .kv
            .all(META_COLLECTION)
            .await?
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_value::<HistoryEntry>(v).ok())
            .filter(|e| {
                e.prompt.to_lowercase().contains(&needle)
                    || e.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .collect();
        entries.sort_by(|a, b| b.at.cmp(&a.at));
        Ok(entries)
    }

    /// Totals by provider and grade plus mean axis scores.
    pub async fn stats(&self) -> ForgeResult<HistoryStats> {
        let entries = self.list(&HistoryFilter::default()).await?;
        let total = entries.len();
        let mut by_provider: HashMap<String, u64> = HashMap::new();
        let mut by_grade: HashMap<String, u64> = HashMap::new();
        let (mut c, mut r, mut l, mut n) = (0.0, 0.0, 0.0, 0.0);
        for entry in &entries {
            *by_provider.entry(entry.provider.clone()).or_default() += 1;
            *by_grade.entry(entry.grade.as_str().to_string()).or_default() += 1;
            c += entry.score.conatus;
            r += entry.score.ratio;
            l += entry.score.laetitia;
            n += entry.score.natura;
        }
        let div = total.max(1) as f64;
        Ok(HistoryStats {
            total,
            by_provider,
            by_grade,
            mean_conatus: c / div,
            mean_ratio: r / div,
            mean_laetitia: l / div,
            mean_natura: n / div,
        })
    }

    /// Delete metadata and artifact together. Returns whether the entry
    /// existed.
    pub async fn delete(&self, id: &str) -> ForgeResult<bool> {
        let meta = self.kv.delete(META_COLLECTION, id).await?;
        let code = self.kv.delete(CODE_COLLECTION, id).await?;
        Ok(meta || code)
    }
}
