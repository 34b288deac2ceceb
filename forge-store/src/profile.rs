//! User profile
//!
//! `profile.json` holds a small preference record fed into the enhancer as
//! the profile hint. Absent files read as the default profile.

use crate::kv::write_json_atomic;
use forge_core::{ForgeResult, StoreError, StylePreset};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// User preferences applied to every generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Profile {
    /// Preferred style when the intent does not specify one.
    pub default_style: Option<StylePreset>,
    /// Free-text hint interpolated into enhanced prompts.
    pub hint: Option<String>,
}

/// Reads and writes `profile.json` under the data directory.
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join("profile.json"),
        }
    }

    pub async fn load(&self) -> ForgeResult<Profile> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Profile::default()),
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

    pub async fn save(&self, profile: &Profile) -> ForgeResult<()> {
        let value = serde_json::to_value(profile).map_err(|e| StoreError::SerializeFailed {
            reason: e.to_string(),
        })?;
        write_json_atomic(&self.path, &value).await
    }
}
