//! Configuration schema and loading.
//!
//! Infragraph is configured via a TOML file at `<data_dir>/infragraph.toml`.
//! Adapters are declared there, so a new account or service mapping needs
//! no code changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use infragraph_graph::{CloudProvider, ResourceType, RetentionPolicy};
use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub adapters: BTreeMap<String, AdapterConfig>,
}

/// Which graph backend to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    /// Process-local; nothing survives the process.
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file; defaults to `<data_dir>/infragraph.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Discovery units run at once per adapter.
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,

    /// Create flagged placeholder nodes for edge targets nobody discovered.
    #[serde(default = "default_true")]
    pub synthesize_placeholders: bool,

    /// Capture a snapshot after every sync.
    #[serde(default = "default_true")]
    pub snapshot_on_sync: bool,

    /// Minutes before an adapter's last sync counts as stale.
    #[serde(default = "default_interval")]
    pub interval_minutes: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            synthesize_placeholders: true,
            snapshot_on_sync: true,
            interval_minutes: default_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub max_snapshots: Option<usize>,

    #[serde(default)]
    pub max_age_days: Option<i64>,
}

impl RetentionConfig {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_snapshots: self.max_snapshots,
            max_age_ms: self.max_age_days.map(|days| days.saturating_mul(86_400_000)),
        }
    }
}

/// One configured discovery adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub provider: CloudProvider,

    #[serde(default)]
    pub display_name: Option<String>,

    /// Account, subscription or project the resources belong to.
    pub account: String,

    #[serde(default)]
    pub regions: Vec<String>,

    /// JSON resource dump served by the bundled fixture client.
    #[serde(default)]
    pub fixture: Option<PathBuf>,

    #[serde(default)]
    pub services: Vec<ServiceMapping>,
}

/// How records of one provider service become nodes.
///
/// All `*_field` values are field paths understood by
/// [`infragraph_graph::path::resolve`].
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceMapping {
    pub service: String,
    pub resource_type: ResourceType,
    pub id_field: String,

    #[serde(default)]
    pub name_field: Option<String>,

    #[serde(default)]
    pub tags_field: Option<String>,

    #[serde(default)]
    pub status_field: Option<String>,

    #[serde(default)]
    pub created_at_field: Option<String>,

    #[serde(default)]
    pub cost_field: Option<String>,

    /// Tag whose value becomes the node owner.
    #[serde(default)]
    pub owner_tag: Option<String>,

    /// Not regional; discovered once under the `global` region.
    #[serde(default)]
    pub global: bool,
}

impl ServiceMapping {
    pub fn new(service: impl Into<String>, resource_type: ResourceType, id_field: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            resource_type,
            id_field: id_field.into(),
            name_field: None,
            tags_field: None,
            status_field: None,
            created_at_field: None,
            cost_field: None,
            owner_tag: None,
            global: false,
        }
    }
}

impl InfraConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults. Relative fixture paths are taken
    /// relative to the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        Ok(config)
    }

    fn resolve_relative(&mut self, base: &Path) {
        for adapter in self.adapters.values_mut() {
            if let Some(fixture) = adapter.fixture.as_mut() {
                if fixture.is_relative() {
                    *fixture = base.join(&*fixture);
                }
            }
        }
        if let Some(path) = self.storage.path.as_mut() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Get configuration for a specific adapter.
    pub fn get(&self, name: &str) -> Option<&AdapterConfig> {
        self.adapters.get(name)
    }

    /// Check if an adapter is enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.adapters.get(name).map(|c| c.enabled).unwrap_or(false)
    }

    /// List all enabled adapter names, sorted.
    pub fn enabled_adapters(&self) -> Vec<&str> {
        self.adapters
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
