//! Plugin registry
//!
//! Plugins come in two forms: native bundles implementing [`Plugin`]
//! (hooks, commands, init/destroy), and declarative JSON manifests
//! discovered under the plugin directory (`<name>.json` or
//! `<name>/plugin.json`). Enabled/disabled state persists to a sidecar
//! file. A plugin that fails to load is reported and skipped; discovery
//! never aborts.

use crate::hooks::{HookBus, HookHandler, HookPoint};
use forge_core::{ForgeResult, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Sidecar file holding enable state.
const STATE_FILE: &str = "plugin-state.json";

/// Declarative plugin metadata. Unknown manifest fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    /// Hook point names this plugin attaches to.
    #[serde(default)]
    pub hooks: Vec<String>,
    /// Command names this plugin offers.
    #[serde(default)]
    pub commands: Vec<String>,
}

/// A command handler: JSON in, JSON out.
pub type CommandHandler =
    Arc<dyn Fn(&serde_json::Value) -> ForgeResult<serde_json::Value> + Send + Sync>;

/// A native in-process plugin bundle.
pub trait Plugin: Send + Sync {
    fn manifest(&self) -> PluginManifest;

    /// Hook handlers to register on enable. Handler names are prefixed
    /// with `<plugin>:` by the registry.
    fn hooks(&self) -> Vec<(HookPoint, HookHandler)> {
        Vec::new()
    }

    /// Commands to expose on enable.
    fn commands(&self) -> Vec<(String, CommandHandler)> {
        Vec::new()
    }

    fn init(&self) -> ForgeResult<()> {
        Ok(())
    }

    fn destroy(&self) -> ForgeResult<()> {
        Ok(())
    }
}

/// One plugin's load report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginReport {
    pub name: String,
    pub enabled: bool,
    pub error: Option<String>,
}

struct LoadedPlugin {
    manifest: PluginManifest,
    /// Native bundle; manifest-only plugins carry None.
    native: Option<Arc<dyn Plugin>>,
    enabled: bool,
}

/// Tracks plugins, wires their hooks into the bus, and persists enable
/// state.
pub struct PluginRegistry {
    bus: Arc<HookBus>,
    state_path: PathBuf,
    plugins: Mutex<HashMap<String, LoadedPlugin>>,
    /// command name → (owning plugin, handler); first-loaded wins.
    commands: Mutex<HashMap<String, (String, CommandHandler)>>,
}

impl PluginRegistry {
    pub fn new(bus: Arc<HookBus>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            bus,
            state_path: data_dir.into().join(STATE_FILE),
            plugins: Mutex::new(HashMap::new()),
            commands: Mutex::new(HashMap::new()),
        }
    }

    /// Discover manifest plugins under `dir`. Returns one report per
    /// candidate; failures never abort the scan.
    pub fn discover(&self, dir: &Path) -> Vec<PluginReport> {
        let mut reports = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return reports,
        };

        let saved_state = self.load_state();
        for entry in entries.flatten() {
            let path = entry.path();
            let manifest_path = if path.is_dir() {
                path.join("plugin.json")
            } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
                path.clone()
            } else {
                continue;
            };

            let label = manifest_path.display().to_string();
            match load_manifest(&manifest_path) {
                Ok(manifest) => {
                    let name = manifest.name.clone();
                    let enabled = saved_state.get(&name).copied().unwrap_or(true);
                    self.insert(manifest, None, enabled);
                    reports.push(PluginReport {
                        name,
                        enabled,
                        error: None,
                    });
                }
                Err(error) => {
                    tracing::warn!(path = %label, %error, "Plugin load failed");
                    reports.push(PluginReport {
                        name: label,
                        enabled: false,
                        error: Some(error.to_string()),
                    });
                }
            }
        }
        reports
    }

    /// Register a native plugin bundle. Enabled by default unless the
    /// sidecar says otherwise.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> ForgeResult<PluginReport> {
        let manifest = plugin.manifest();
        let name = manifest.name.clone();
        let enabled = self.load_state().get(&name).copied().unwrap_or(true);
        self.insert(manifest, Some(plugin), false);
        if enabled {
            self.enable(&name)?;
        }
        Ok(PluginReport {
            name,
            enabled,
            error: None,
        })
    }

    fn insert(&self, manifest: PluginManifest, native: Option<Arc<dyn Plugin>>, enabled: bool) {
        let name = manifest.name.clone();
        let mut plugins = self.plugins.lock().expect("plugin registry lock");
        plugins.insert(
            name,
            LoadedPlugin {
                manifest,
                native,
                enabled,
            },
        );
    }

    /// Enable a plugin: wire its hooks and commands, run `init`.
    pub fn enable(&self, name: &str) -> ForgeResult<()> {
        let native = {
            let mut plugins = self.plugins.lock().expect("plugin registry lock");
            let plugin = plugins.get_mut(name).ok_or_else(|| StoreError::EntryNotFound {
                id: name.to_string(),
            })?;
            if plugin.enabled {
                return Ok(());
            }
            plugin.enabled = true;
            plugin.native.clone()
        };

        if let Some(plugin) = native {
            let manifest = plugin.manifest();
            for (point, handler) in plugin.hooks() {
                self.bus.register(
                    point,
                    format!("{}:{}", name, point.as_str()),
                    manifest.priority,
                    handler,
                );
            }
            let mut commands = self.commands.lock().expect("plugin command lock");
            for (command, handler) in plugin.commands() {
                match commands.entry(command.clone()) {
                    std::collections::hash_map::Entry::Occupied(existing) => {
                        tracing::warn!(
                            command = %command,
                            winner = %existing.get().0,
                            loser = %name,
                            "Command collision, first-loaded wins"
                        );
                    }
                    std::collections::hash_map::Entry::Vacant(slot) => {
                        slot.insert((name.to_string(), handler));
                    }
                }
            }
            plugin.init()?;
        }
        self.save_state();
        Ok(())
    }

    /// Disable a plugin: run `destroy`, unwire hooks and commands.
    pub fn disable(&self, name: &str) -> ForgeResult<()> {
        let native = {
            let mut plugins = self.plugins.lock().expect("plugin registry lock");
            let plugin = plugins.get_mut(name).ok_or_else(|| StoreError::EntryNotFound {
                id: name.to_string(),
            })?;
            if !plugin.enabled {
                return Ok(());
            }
            plugin.enabled = false;
            plugin.native.clone()
        };

        if let Some(plugin) = native {
            plugin.destroy()?;
            self.bus.unregister_prefix(&format!("{}:", name));
            let mut commands = self.commands.lock().expect("plugin command lock");
            commands.retain(|_, (owner, _)| owner != name);
        }
        self.save_state();
        Ok(())
    }

    /// O(1) command lookup.
    pub fn command(&self, name: &str) -> Option<CommandHandler> {
        self.commands
            .lock()
            .expect("plugin command lock")
            .get(name)
            .map(|(_, handler)| Arc::clone(handler))
    }

    /// Current plugin list with enable state.
    pub fn list(&self) -> Vec<PluginReport> {
        let plugins = self.plugins.lock().expect("plugin registry lock");
        let mut reports: Vec<PluginReport> = plugins
            .values()
            .map(|p| PluginReport {
                name: p.manifest.name.clone(),
                enabled: p.enabled,
                error: None,
            })
            .collect();
        reports.sort_by(|a, b| a.name.cmp(&b.name));
        reports
    }

    fn load_state(&self) -> HashMap<String, bool> {
        std::fs::read_to_string(&self.state_path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    fn save_state(&self) {
        let state: HashMap<String, bool> = {
            let plugins = self.plugins.lock().expect("plugin registry lock");
            plugins
                .iter()
                .map(|(name, p)| (name.clone(), p.enabled))
                .collect()
        };
        if let Some(parent) = self.state_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(text) = serde_json::to_string_pretty(&state) {
            if let Err(error) = std::fs::write(&self.state_path, text) {
                tracing::warn!(%error, "Failed to persist plugin state");
            }
        }
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("state_path", &self.state_path)
            .field("plugins", &self.list().len())
            .finish()
    }
}

fn load_manifest(path: &Path) -> ForgeResult<PluginManifest> {
    let text = std::fs::read_to_string(path).map_err(|e| StoreError::ReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let manifest: PluginManifest =
        serde_json::from_str(&text).map_err(|e| StoreError::SerializeFailed {
            reason: format!("{}: {}", path.display(), e),
        })?;
    if manifest.name.trim().is_empty() {
        return Err(StoreError::SerializeFailed {
            reason: format!("{}: plugin name is empty", path.display()),
        }
        .into());
    }
    // Declared hook points must parse; catches manifest typos early.
    for hook in &manifest.hooks {
        if HookPoint::parse(hook).is_none() {
            return Err(StoreError::SerializeFailed {
                reason: format!("{}: unknown hook point {}", path.display(), hook),
            }
            .into());
        }
    }
    Ok(manifest)
}
