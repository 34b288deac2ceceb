//! Context probes
//!
//! A probe is a pluggable read-only signal source contributing a short text
//! hint to the enhanced prompt. Probes are polled in parallel, each bounded
//! by its own timeout and cached under its own TTL. A failing probe
//! contributes nothing and never aborts the bundle.

use async_trait::async_trait;
use forge_core::ForgeResult;
use forge_store::{Cache, Namespace};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;

/// Default per-probe timeout when the probe does not override it.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A pluggable signal source.
#[async_trait]
pub trait ContextProbe: Send + Sync {
    /// Stable name; doubles as the cache key.
    fn name(&self) -> &str;

    /// How long a produced hint stays fresh.
    fn ttl(&self) -> Duration {
        Duration::from_secs(300)
    }

    /// Per-probe poll timeout.
    fn timeout(&self) -> Duration {
        DEFAULT_PROBE_TIMEOUT
    }

    /// Produce the hint. Errors are swallowed by the bundle.
    async fn hint(&self) -> ForgeResult<String>;
}

/// The registered probes plus their shared hint cache.
pub struct ProbeSet {
    probes: Vec<Arc<dyn ContextProbe>>,
    cache: Namespace<String>,
}

impl ProbeSet {
    /// An empty set sharing the given cache under the `probe` namespace.
    pub fn new(cache: &Arc<Cache<String>>) -> Self {
        Self {
            probes: Vec::new(),
            cache: Namespace::new(Arc::clone(cache), "probe", Duration::from_secs(300)),
        }
    }

    /// Register a probe. Bundle order is registration order.
    pub fn register(&mut self, probe: Arc<dyn ContextProbe>) {
        self.probes.push(probe);
    }

    /// The standard probe set: clock, system, and (if given) workspace.
    pub fn with_builtins(cache: &Arc<Cache<String>>, workspace: Option<std::path::PathBuf>) -> Self {
        let mut set = Self::new(cache);
        set.register(Arc::new(ClockProbe));
        set.register(Arc::new(SystemProbe));
        if let Some(dir) = workspace {
            set.register(Arc::new(WorkspaceProbe::new(dir)));
        }
        set
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Poll every probe in parallel and assemble the bundle: non-empty
    /// hints joined by newlines, in registration order. Cached hints skip
    /// the poll; timeouts and errors contribute the empty string.
    pub async fn gather(&self) -> String {
        let polls = self.probes.iter().map(|probe| {
            let probe = Arc::clone(probe);
            let cache = self.cache.clone();
            async move {
                if let Some(hit) = cache.get(probe.name()) {
                    return hit;
                }
                match tokio::time::timeout(probe.timeout(), probe.hint()).await {
                    Ok(Ok(hint)) => {
                        cache.set_with_ttl(probe.name(), hint.clone(), probe.ttl());
                        hint
                    }
                    Ok(Err(error)) => {
                        tracing::debug!(probe = probe.name(), %error, "Probe failed");
                        String::new()
                    }
                    Err(_) => {
                        tracing::debug!(probe = probe.name(), "Probe timed out");
                        String::new()
                    }
                }
            }
        });

        join_all(polls)
            .await
            .into_iter()
            .filter(|hint| !hint.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl std::fmt::Debug for ProbeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeSet")
            .field("probes", &self.probes.iter().map(|p| p.name().to_string()).collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// BUILT-IN PROBES
// ============================================================================

/// Time-of-day and weekday hint.
pub struct ClockProbe;

#[async_trait]
impl ContextProbe for ClockProbe {
    fn name(&self) -> &str {
        "clock"
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(600)
    }

    async fn hint(&self) -> ForgeResult<String> {
        let now = chrono::Local::now();
        let part = match now.format("%H").to_string().parse::<u8>().unwrap_or(12) {
            0..=5 => "late night",
            6..=11 => "morning",
            12..=17 => "afternoon",
            _ => "evening",
        };
        Ok(format!("It is {} on {}.", part, now.format("%A")))
    }
}

/// Host shape hint: OS family and logical CPU count.
pub struct SystemProbe;

#[async_trait]
impl ContextProbe for SystemProbe {
    fn name(&self) -> &str {
        "system"
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(3600)
    }

    async fn hint(&self) -> ForgeResult<String> {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Ok(format!(
            "Host: {} with {} logical cores.",
            std::env::consts::OS,
            cpus
        ))
    }
}

/// Rough activity hint from a workspace directory.
pub struct WorkspaceProbe {
    dir: std::path::PathBuf,
}

impl WorkspaceProbe {
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ContextProbe for WorkspaceProbe {
    fn name(&self) -> &str {
        "workspace"
    }

    async fn hint(&self) -> ForgeResult<String> {
        let mut count = 0usize;
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            // Missing workspace just means no hint.
            Err(_) => return Ok(String::new()),
        };
        while let Ok(Some(_)) = dir.next_entry().await {
            count += 1;
            if count > 500 {
                break;
            }
        }
        if count == 0 {
            Ok(String::new())
        } else {
            Ok(format!("Workspace has {} top-level entries.", count))
        }
    }
}
