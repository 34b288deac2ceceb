//! Grimoire: the curated prompt library
//!
//! Entries are inscribed with tags and a category, searched by free text
//! or filters, and always ordered `favorite DESC, score DESC, used_count
//! DESC`. Entry ids are opaque and never reused.

use crate::kv::KvStore;
use forge_core::{short_id, ForgeResult, GrimoireEntry, StoreError};
use std::collections::HashMap;
use std::sync::Arc;

const COLLECTION: &str = "grimoire";

/// Query for [`Grimoire::search`]. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct GrimoireQuery {
    /// Free text matched against prompt, tags, and category.
    pub q: Option<String>,
    pub tag: Option<String>,
    pub category: Option<String>,
    pub favorite_only: bool,
    pub limit: Option<usize>,
}

/// Aggregate statistics for the library.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GrimoireStats {
    pub total: usize,
    pub favorites: usize,
    pub by_tag: HashMap<String, u64>,
    pub by_category: HashMap<String, u64>,
    pub mean_score: f64,
    /// Up to five most-used prompts, usage-descending.
    pub top_used: Vec<(String, u64)>,
}

/// The prompt library.
pub struct Grimoire {
    kv: Arc<KvStore>,
}

impl Grimoire {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// Inscribe a new prompt. Ids are fresh; an inscribed entry is never
    /// rewritten under another id.
    pub async fn inscribe(
        &self,
        prompt: impl Into<String>,
        tags: Vec<String>,
        category: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> ForgeResult<GrimoireEntry> {
        let entry = GrimoireEntry {
            id: short_id(),
            prompt: prompt.into(),
            tags,
            category: category.into(),
            favorite: false,
            score: None,
            metadata,
            created_at: chrono::Utc::now(),
            used_count: 0,
        };
        self.put(&entry).await?;
        Ok(entry)
    }

    pub async fn get(&self, id: &str) -> ForgeResult<Option<GrimoireEntry>> {
        match self.kv.get(COLLECTION, id).await? {
            Some(value) => Ok(serde_json::from_value(value).ok()),
            None => Ok(None),
        }
    }

    /// Search with filters; results always sorted favorite/score/usage.
    pub async fn search(&self, query: &GrimoireQuery) -> ForgeResult<Vec<GrimoireEntry>> {
        let mut entries: Vec<GrimoireEntry> = self
            .kv
            .all(COLLECTION)
            .await?
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_value(v).ok())
            .collect();

        if let Some(q) = &query.q {
            let needle = q.to_lowercase();
            entries.retain(|e| {
                e.prompt.to_lowercase().contains(&needle)
                    || e.category.to_lowercase().contains(&needle)
                    || e.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            });
        }
        if let Some(tag) = &query.tag {
            entries.retain(|e| e.tags.iter().any(|t| t == tag));
        }
        if let Some(category) = &query.category {
            entries.retain(|e| &e.category == category);
        }
        if query.favorite_only {
            entries.retain(|e| e.favorite);
        }

        entries.sort_by(|a, b| {
            b.favorite
                .cmp(&a.favorite)
                .then_with(|| {
                    let sa = a.score.unwrap_or(-1.0);
                    let sb = b.score.unwrap_or(-1.0);
                    sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.used_count.cmp(&a.used_count))
        });

        if let Some(limit) = query.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Flip the favorite flag. Returns the new value.
    pub async fn toggle_favorite(&self, id: &str) -> ForgeResult<bool> {
        let mut entry = self.require(id).await?;
        entry.favorite = !entry.favorite;
        self.put(&entry).await?;
        Ok(entry.favorite)
    }

    /// Increment the usage counter.
    pub async fn record_use(&self, id: &str) -> ForgeResult<u64> {
        let mut entry = self.require(id).await?;
        entry.used_count += 1;
        self.put(&entry).await?;
        Ok(entry.used_count)
    }

    /// Set the quality score, clamped into [0, 1].
    pub async fn update_score(&self, id: &str, score: f64) -> ForgeResult<()> {
        let mut entry = self.require(id).await?;
        entry.score = Some(score.clamp(0.0, 1.0));
        self.put(&entry).await
    }

    pub async fn delete(&self, id: &str) -> ForgeResult<bool> {
        self.kv.delete(COLLECTION, id).await
    }

    pub async fn stats(&self) -> ForgeResult<GrimoireStats> {
        let entries = self.search(&GrimoireQuery::default()).await?;
        let total = entries.len();
        let favorites = entries.iter().filter(|e| e.favorite).count();
        let mut by_tag: HashMap<String, u64> = HashMap::new();
        let mut by_category: HashMap<String, u64> = HashMap::new();
        let mut score_sum = 0.0;
        let mut score_count = 0usize;
        for entry in &entries {
            for tag in &entry.tags {
                *by_tag.entry(tag.clone()).or_default() += 1;
            }
            *by_category.entry(entry.category.clone()).or_default() += 1;
            if let Some(score) = entry.score {
                score_sum += score;
                score_count += 1;
            }
        }
        let mut top_used: Vec<(String, u64)> = entries
            .iter()
            .filter(|e| e.used_count > 0)
            .map(|e| (e.prompt.clone(), e.used_count))
            .collect();
        top_used.sort_by(|a, b| b.1.cmp(&a.1));
        top_used.truncate(5);

        Ok(GrimoireStats {
            total,
            favorites,
            by_tag,
            by_category,
            mean_score: if score_count == 0 {
                0.0
            } else {
                score_sum / score_count as f64
            },
            top_used,
        })
    }

    async fn require(&self, id: &str) -> ForgeResult<GrimoireEntry> {
        self.get(id).await?.ok_or_else(|| {
            StoreError::EntryNotFound {
                id: id.to_string(),
            }
            .into()
        })
    }

    async fn put(&self, entry: &GrimoireEntry) -> ForgeResult<()> {
        let value = serde_json::to_value(entry).map_err(|e| StoreError::SerializeFailed {
            reason: e.to_string(),
        })?;
        self.kv.set(COLLECTION, &entry.id, value).await
    }
}
