//! Discovery adapters.
//!
//! This module provides:
//! - `DiscoveryAdapter` trait that every source of resources implements
//! - `AdapterRegistry` for building adapters from configuration
//! - `RuleDrivenAdapter`, a generic adapter driven by service mappings
//!
//! # Adding an Adapter
//!
//! 1. Declare it under `[adapters.<name>]` in `infragraph.toml`
//! 2. Either point it at a fixture, or implement `ResourceClient` for the
//!    real provider API and register it with `AdapterRegistry::register`

mod client;
mod rule_driven;

pub use client::{FixtureClient, ResourceClient, UnconfiguredClient};
pub use rule_driven::RuleDrivenAdapter;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use infragraph_graph::{
    CloudProvider, DiscoveryError, DiscoveryMethod, EdgeInput, NodeInput, ResourceType, RuleEngine, RuleSource, Tags,
};
use tokio_util::sync::CancellationToken;

use crate::config::InfraConfig;

/// Restrictions and cancellation for one discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    /// Empty means every supported type.
    pub resource_types: Vec<ResourceType>,
    /// Empty means every configured region.
    pub regions: Vec<String>,
    /// Nodes must carry all of these tags.
    pub tags: Tags,
    /// Cap on the number of nodes returned.
    pub limit: Option<usize>,
    pub cancel: CancellationToken,
}

impl DiscoverOptions {
    pub fn wants_type(&self, resource_type: ResourceType) -> bool {
        self.resource_types.is_empty() || self.resource_types.contains(&resource_type)
    }

    pub fn wants_region(&self, region: &str) -> bool {
        self.regions.is_empty() || self.regions.iter().any(|r| r == region)
    }

    pub fn wants_tags(&self, tags: &Tags) -> bool {
        self.tags.iter().all(|(k, v)| tags.get(k) == Some(v))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Output of one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub provider: CloudProvider,
    pub nodes: Vec<NodeInput>,
    pub edges: Vec<EdgeInput>,
    pub errors: Vec<DiscoveryError>,
    pub duration_ms: i64,
    /// Some units never started because the run was cancelled.
    pub cancelled: bool,
}

impl DiscoveryResult {
    pub fn empty(provider: CloudProvider) -> Self {
        Self {
            provider,
            nodes: Vec::new(),
            edges: Vec::new(),
            errors: Vec::new(),
            duration_ms: 0,
            cancelled: false,
        }
    }
}

/// Trait that all discovery adapters must implement.
#[async_trait]
pub trait DiscoveryAdapter: Send + Sync {
    /// Registry key; sync records are filed under it.
    fn name(&self) -> &str {
        self.provider().as_str()
    }

    fn provider(&self) -> CloudProvider;

    /// Human-readable display name (e.g., "AWS production").
    fn display_name(&self) -> &str;

    /// Account, subscription or project this adapter discovers.
    ///
    /// Scopes reconciliation: a sync only flags nodes of its own account
    /// as disappeared. `None` claims every node of the provider.
    fn account(&self) -> Option<&str> {
        None
    }

    fn supported_resource_types(&self) -> Vec<ResourceType>;

    /// Discover resources and relationships.
    ///
    /// Never fails as a whole: per-unit failures are reported in
    /// `DiscoveryResult::errors`.
    async fn discover(&self, options: &DiscoverOptions) -> DiscoveryResult;

    async fn health_check(&self) -> bool;

    fn supports_incremental_sync(&self) -> bool {
        false
    }

    /// Derive edges from one raw provider record.
    ///
    /// The default applies the standard rule table.
    fn extract_relationships(
        &self,
        source_node_id: &str,
        source_type: ResourceType,
        raw: &serde_json::Value,
        account: &str,
        region: &str,
    ) -> Vec<EdgeInput> {
        let source = RuleSource {
            node_id: source_node_id,
            provider: self.provider(),
            resource_type: source_type,
            account,
            region,
        };
        RuleEngine::standard().extract(&source, raw, DiscoveryMethod::ApiField)
    }
}

/// Registry of available adapters, keyed by name.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn DiscoveryAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a rule-driven adapter for every enabled adapter in `config`.
    ///
    /// Adapters with a fixture get a `FixtureClient`; the rest get a client
    /// that reports itself unavailable when a run starts.
    pub fn from_config(config: &InfraConfig) -> Result<Self> {
        let mut registry = Self::new();
        for name in config.enabled_adapters() {
            let Some(adapter) = config.get(name) else {
                continue;
            };
            let client: Arc<dyn ResourceClient> = match &adapter.fixture {
                Some(path) => Arc::new(FixtureClient::new(path)),
                None => Arc::new(UnconfiguredClient::new(name)),
            };
            registry.register(Arc::new(RuleDrivenAdapter::from_config(
                name,
                adapter,
                client,
                config.sync.max_concurrency,
            )));
        }
        Ok(registry)
    }

    /// Add an adapter, replacing any with the same name.
    pub fn register(&mut self, adapter: Arc<dyn DiscoveryAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DiscoveryAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    /// Registered adapter names, sorted.
    pub fn list_available(&self) -> Vec<&str> {
        self.adapters.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_filters() {
        let mut options = DiscoverOptions::default();
        assert!(options.wants_type(ResourceType::Compute));
        assert!(options.wants_region("anywhere"));

        options.resource_types = vec![ResourceType::Database];
        options.regions = vec!["us-east-1".into()];
        options.tags.insert("env".into(), "prod".into());
        assert!(!options.wants_type(ResourceType::Compute));
        assert!(options.wants_region("us-east-1"));
        assert!(!options.wants_region("eu-west-1"));

        let mut tags = Tags::new();
        assert!(!options.wants_tags(&tags));
        tags.insert("env".into(), "prod".into());
        tags.insert("team".into(), "core".into());
        assert!(options.wants_tags(&tags));
    }

    #[test]
    fn test_registry_from_config() {
        let config: InfraConfig = toml::from_str(
            r#"
[adapters.prod]
provider = "aws"
account = "1"

[adapters.lab]
provider = "azure"
account = "sub"
enabled = false
"#,
        )
        .unwrap();
        let registry = AdapterRegistry::from_config(&config).unwrap();
        assert_eq!(registry.list_available(), vec!["prod"]);
        let prod = registry.get("prod").unwrap();
        assert_eq!(prod.provider(), CloudProvider::Aws);
        assert!(!registry.is_available("lab"));
    }
}
