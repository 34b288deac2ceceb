//! Workspace migrations
//!
//! `.forge/migrations.json` is an append-only journal of applied migrations.
//! Each migration is idempotent; pending migrations are those whose version
//! is not in the journal. A dry run reports what would be applied without
//! writing anything.

use chrono::{DateTime, Utc};
use forge_core::{ForgeResult, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Journal entry for one applied migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub version: u32,
    pub description: String,
    pub applied_at: DateTime<Utc>,
    pub result: String,
}

type MigrationFn = Box<dyn Fn(&Path) -> ForgeResult<String> + Send + Sync>;

/// A registered migration. `run` receives the workspace root and returns a
/// short result summary; it must be safe to run twice.
pub struct Migration {
    pub version: u32,
    pub description: String,
    run: MigrationFn,
}

impl Migration {
    pub fn new(
        version: u32,
        description: impl Into<String>,
        run: impl Fn(&Path) -> ForgeResult<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            version,
            description: description.into(),
            run: Box::new(run),
        }
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish()
    }
}

/// Applies registered migrations against a workspace directory.
pub struct Migrator {
    workspace: PathBuf,
    migrations: Vec<Migration>,
}

impl Migrator {
    /// Create a migrator with the built-in migration set.
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self::with_migrations(workspace, builtin_migrations())
    }

    /// Create a migrator with an explicit migration set (tests).
    pub fn with_migrations(workspace: impl Into<PathBuf>, mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self {
            workspace: workspace.into(),
            migrations,
        }
    }

    fn journal_path(&self) -> PathBuf {
        self.workspace.join(".forge").join("migrations.json")
    }

    /// The journal of applied migrations, oldest first.
    pub fn applied(&self) -> ForgeResult<Vec<AppliedMigration>> {
        let path = self.journal_path();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::ReadFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        };
        Ok(serde_json::from_str(&text).unwrap_or_default())
    }

    /// Registered migrations whose version is not in the journal.
    pub fn pending(&self) -> ForgeResult<Vec<(u32, String)>> {
        let applied: Vec<u32> = self.applied()?.iter().map(|m| m.version).collect();
        Ok(self
            .migrations
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .map(|m| (m.version, m.description.clone()))
            .collect())
    }

    /// Report what `upgrade` would apply. Never writes.
    pub fn dry_run(&self) -> ForgeResult<Vec<(u32, String)>> {
        self.pending()
    }

    /// Apply all pending migrations in version order, appending each result
    /// to the journal.
    pub fn upgrade(&self) -> ForgeResult<Vec<AppliedMigration>> {
        let applied_versions: Vec<u32> = self.applied()?.iter().map(|m| m.version).collect();
        let mut newly_applied = Vec::new();

        for migration in &self.migrations {
            if applied_versions.contains(&migration.version) {
                continue;
            }
            tracing::info!(
                version = migration.version,
                description = %migration.description,
                "Applying migration"
            );
            let result = (migration.run)(&self.workspace)?;
            let record = AppliedMigration {
                version: migration.version,
                description: migration.description.clone(),
                applied_at: Utc::now(),
                result,
            };
            self.append(&record)?;
            newly_applied.push(record);
        }
        Ok(newly_applied)
    }

    fn append(&self, record: &AppliedMigration) -> ForgeResult<()> {
        let mut journal = self.applied()?;
        journal.push(record.clone());
        let path = self.journal_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::WriteFailed {
                path: parent.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        let text =
            serde_json::to_string_pretty(&journal).map_err(|e| StoreError::SerializeFailed {
                reason: e.to_string(),
            })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| StoreError::WriteFailed {
            path: tmp.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| StoreError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// The built-in migration set.
fn builtin_migrations() -> Vec<Migration> {
    vec![Migration::new(
        1,
        "split history artifacts into their own collection",
        |workspace| {
            // Older layouts stored HTML inline in history entries. Move any
            // inline `html` field into the artifacts collection. Running
            // against a current layout is a no-op.
            let history_path = workspace.join("store").join("history.json");
            let text = match std::fs::read_to_string(&history_path) {
                Ok(text) => text,
                Err(_) => return Ok("no history file, nothing to do".to_string()),
            };
            let Ok(serde_json::Value::Object(mut history)) = serde_json::from_str(&text) else {
                return Ok("history unreadable, nothing to do".to_string());
            };

            let mut moved = 0usize;
            let mut artifacts = serde_json::Map::new();
            for (id, entry) in history.iter_mut() {
                if let Some(obj) = entry.as_object_mut() {
                    if let Some(html) = obj.remove("html") {
                        artifacts.insert(id.clone(), html);
                        moved += 1;
                    }
                }
            }
            if moved == 0 {
                return Ok("already split".to_string());
            }

            let artifacts_path = workspace.join("store").join("artifacts.json");
            let merged = match std::fs::read_to_string(&artifacts_path)
                .ok()
                .and_then(|t| serde_json::from_str::<serde_json::Value>(&t).ok())
            {
                Some(serde_json::Value::Object(mut existing)) => {
                    existing.extend(artifacts);
                    existing
                }
                _ => artifacts,
            };

            let write = |path: &Path, value: &serde_json::Value| -> ForgeResult<()> {
                std::fs::write(path, serde_json::to_string_pretty(value).unwrap_or_default())
                    .map_err(|e| {
                        StoreError::WriteFailed {
                            path: path.display().to_string(),
                            reason: e.to_string(),
                        }
                        .into()
                    })
            };
            write(&artifacts_path, &serde_json::Value::Object(merged))?;
            write(&history_path, &serde_json::Value::Object(history))?;
            Ok(format!("moved {} inline artifacts", moved))
        },
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn counting_migration(version: u32, counter: Arc<AtomicU32>) -> Migration {
        Migration::new(version, format!("test migration {}", version), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("ok".to_string())
        })
    }

    #[test]
    fn test_upgrade_applies_pending_in_order() {
        let dir = TempDir::new().unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let migrator = Migrator::with_migrations(
            dir.path(),
            vec![
                counting_migration(2, counter.clone()),
                counting_migration(1, counter.clone()),
            ],
        );
        let applied = migrator.upgrade().unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].version, 1);
        assert_eq!(applied[1].version, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_upgrade_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let make = || {
            Migrator::with_migrations(dir.path(), vec![counting_migration(1, counter.clone())])
        };
        make().upgrade().unwrap();
        let second = make().upgrade().unwrap();
        assert!(second.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(make().pending().unwrap().is_empty());
    }

    #[test]
    fn test_dry_run_never_writes() {
        let dir = TempDir::new().unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let migrator =
            Migrator::with_migrations(dir.path(), vec![counting_migration(1, counter.clone())]);
        let planned = migrator.dry_run().unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join(".forge").join("migrations.json").exists());
    }

    #[test]
    fn test_builtin_split_migration_moves_inline_html() {
        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join("store");
        std::fs::create_dir_all(&store_dir).unwrap();
        std::fs::write(
            store_dir.join("history.json"),
            r#"{"abc": {"prompt": "p", "html": "<html></html>"}}"#,
        )
        .unwrap();

        let migrator = Migrator::new(dir.path());
        let applied = migrator.upgrade().unwrap();
        assert_eq!(applied.len(), 1);
        assert!(applied[0].result.contains("moved 1"));

        let artifacts =
            std::fs::read_to_string(store_dir.join("artifacts.json")).unwrap();
        assert!(artifacts.contains("<html>"));
        let history = std::fs::read_to_string(store_dir.join("history.json")).unwrap();
        assert!(!history.contains("<html>"));

        // Second pass: journal says applied, nothing runs.
        assert!(Migrator::new(dir.path()).upgrade().unwrap().is_empty());
    }
}
