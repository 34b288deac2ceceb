//! FORGE Store - File-Backed Persistence
//!
//! Everything FORGE persists lives under a user-local data directory as
//! human-readable JSON, atomically replaced on write:
//!
//! - `store/<collection>.json` - namespaced KV collections ([`KvStore`])
//! - `telemetry/usage.json` - LLM usage log, capped at the last 1000 calls
//! - `profile.json` - user profile hint fed to the enhancer
//! - `.forge/migrations.json` - append-only migration journal
//!
//! The in-memory [`Cache`] (TTL + LRU, namespaced views) also lives here so
//! storage concerns stay in one crate.

pub mod cache;
pub mod grimoire;
pub mod history;
pub mod kv;
pub mod migrate;
pub mod profile;
pub mod telemetry;

pub use cache::{Cache, CacheStats, Namespace};
pub use grimoire::{Grimoire, GrimoireQuery, GrimoireStats};
pub use history::{History, HistoryFilter, HistoryStats};
pub use kv::KvStore;
pub use migrate::{AppliedMigration, Migration, Migrator};
pub use profile::{Profile, ProfileStore};
pub use telemetry::{DayRollup, Telemetry, TelemetryTotals};
