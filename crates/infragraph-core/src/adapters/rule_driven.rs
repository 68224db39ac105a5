//! Generic discovery adapter driven by configured service mappings.
//!
//! A run is split into units of work, one per (region, service mapping).
//! Units run concurrently up to `max_concurrency`; records within a unit
//! are processed in order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use infragraph_graph::path;
use infragraph_graph::{
    native_id_from_reference, CloudProvider, DiscoveryError, DiscoveryMethod, EdgeCollector, EdgeInput, NodeInput,
    NodeStatus, ResourceType, RuleEngine, RuleSource, GLOBAL_REGION,
};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::{DiscoverOptions, DiscoveryAdapter, DiscoveryResult, ResourceClient};
use crate::config::{AdapterConfig, ServiceMapping};

/// Tag used for the node name when a mapping has no `name_field`.
const NAME_TAG: &str = "Name";

struct Unit<'a> {
    region: &'a str,
    mapping: &'a ServiceMapping,
}

enum UnitOutcome {
    /// Each node with the edges extracted from its record.
    Done(Vec<(NodeInput, Vec<EdgeInput>)>),
    Failed(DiscoveryError),
    /// Not started: the run was cancelled first.
    Skipped,
}

pub struct RuleDrivenAdapter {
    name: String,
    display_name: String,
    provider: CloudProvider,
    account: String,
    regions: Vec<String>,
    services: Vec<ServiceMapping>,
    client: Arc<dyn ResourceClient>,
    engine: RuleEngine,
    max_concurrency: usize,
}

impl RuleDrivenAdapter {
    pub fn new(
        name: impl Into<String>,
        provider: CloudProvider,
        account: impl Into<String>,
        client: Arc<dyn ResourceClient>,
    ) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            provider,
            account: account.into(),
            regions: Vec::new(),
            services: Vec::new(),
            client,
            engine: RuleEngine::standard(),
            max_concurrency: 4,
        }
    }

    pub fn from_config(
        name: &str,
        config: &AdapterConfig,
        client: Arc<dyn ResourceClient>,
        max_concurrency: usize,
    ) -> Self {
        let mut adapter = Self::new(name, config.provider, &config.account, client)
            .with_regions(config.regions.clone())
            .with_max_concurrency(max_concurrency);
        if let Some(display_name) = &config.display_name {
            adapter = adapter.with_display_name(display_name);
        }
        for mapping in &config.services {
            adapter = adapter.with_service(mapping.clone());
        }
        adapter
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_service(mut self, mapping: ServiceMapping) -> Self {
        self.services.push(mapping);
        self
    }

    pub fn with_engine(mut self, engine: RuleEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Units of work for a run, by mapping then region.
    ///
    /// Global mappings run once under the `global` region and ignore the
    /// region filter.
    fn units(&self, options: &DiscoverOptions) -> Vec<Unit<'_>> {
        let mut units = Vec::new();
        for mapping in self.services.iter().filter(|m| options.wants_type(m.resource_type)) {
            if mapping.global {
                units.push(Unit {
                    region: GLOBAL_REGION,
                    mapping,
                });
                continue;
            }
            for region in self.regions.iter().filter(|r| options.wants_region(r)) {
                units.push(Unit {
                    region: region.as_str(),
                    mapping,
                });
            }
        }
        units
    }

    async fn run_unit(&self, unit: Unit<'_>, options: &DiscoverOptions) -> UnitOutcome {
        if options.is_cancelled() {
            return UnitOutcome::Skipped;
        }

        let service = unit.mapping.service.as_str();
        let records = match self.client.list(unit.region, service).await {
            Ok(records) => records,
            Err(e) => {
                warn!(adapter = %self.name, region = unit.region, service, error = %e, "discovery unit failed");
                return UnitOutcome::Failed(
                    DiscoveryError::new(unit.mapping.resource_type.as_str(), format!("{service}: {e:#}"))
                        .in_region(unit.region),
                );
            }
        };

        let mut found = Vec::with_capacity(records.len());
        for record in &records {
            let Some(node) = self.build_node(unit.mapping, unit.region, record) else {
                debug!(region = unit.region, service, field = %unit.mapping.id_field, "record without id skipped");
                continue;
            };
            let source = RuleSource {
                node_id: &node.id,
                provider: self.provider,
                resource_type: node.resource_type,
                account: &node.account,
                region: &node.region,
            };
            let edges = self.engine.extract(&source, record, DiscoveryMethod::ApiField);
            found.push((node, edges));
        }

        debug!(region = unit.region, service, nodes = found.len(), "discovery unit finished");
        UnitOutcome::Done(found)
    }

    fn build_node(&self, mapping: &ServiceMapping, region: &str, record: &Value) -> Option<NodeInput> {
        let raw_id = path::resolve_first(record, &mapping.id_field)?;
        let native_id = native_id_from_reference(&raw_id);
        if native_id.is_empty() {
            return None;
        }

        let mut node = NodeInput::new(self.provider, &self.account, region, mapping.resource_type, native_id);

        let tags = mapping
            .tags_field
            .as_deref()
            .map(|field| path::resolve_tags(record, field))
            .unwrap_or_default();

        let name = mapping
            .name_field
            .as_deref()
            .and_then(|field| path::resolve_first(record, field))
            .or_else(|| tags.get(NAME_TAG).cloned());
        if let Some(name) = name {
            node = node.with_name(name);
        }

        if let Some(state) = mapping.status_field.as_deref().and_then(|f| path::resolve_first(record, f)) {
            node = node.with_status(NodeStatus::from_provider_state(&state));
        }

        let created_at = mapping
            .created_at_field
            .as_deref()
            .and_then(|f| path::resolve_first(record, f))
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok());
        if let Some(created_at) = created_at {
            node = node.with_created_at(created_at.with_timezone(&Utc));
        }

        let cost = mapping
            .cost_field
            .as_deref()
            .and_then(|f| path::resolve_first(record, f))
            .and_then(|raw| raw.parse::<f64>().ok());
        if let Some(cost) = cost {
            node = node.with_cost(cost);
        }

        if let Some(owner) = mapping.owner_tag.as_ref().and_then(|tag| tags.get(tag)).cloned() {
            node = node.with_owner(owner);
        }

        Some(
            node.with_tags(tags)
                .with_metadata("service", Value::String(mapping.service.clone())),
        )
    }
}

#[async_trait]
impl DiscoveryAdapter for RuleDrivenAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> CloudProvider {
        self.provider
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn account(&self) -> Option<&str> {
        Some(&self.account)
    }

    fn supported_resource_types(&self) -> Vec<ResourceType> {
        let mut types: Vec<ResourceType> = self.services.iter().map(|m| m.resource_type).collect();
        types.sort();
        types.dedup();
        types
    }

    #[instrument(skip(self, options), fields(adapter = %self.name))]
    async fn discover(&self, options: &DiscoverOptions) -> DiscoveryResult {
        let started = Instant::now();
        let mut result = DiscoveryResult::empty(self.provider);

        if let Err(e) = self.client.check().await {
            warn!(error = %e, "resource client unavailable");
            result
                .errors
                .push(DiscoveryError::new("*", format!("{e:#}")).with_code("ClientUnavailable"));
            result.duration_ms = started.elapsed().as_millis() as i64;
            return result;
        }

        let units = self.units(options);
        let unit_count = units.len();
        let pending: Vec<BoxFuture<'_, UnitOutcome>> = units
            .into_iter()
            .map(|unit| self.run_unit(unit, options).boxed())
            .collect();
        let outcomes: Vec<UnitOutcome> = stream::iter(pending)
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut seen = HashSet::new();
        let mut edges = EdgeCollector::new();
        for outcome in outcomes {
            match outcome {
                UnitOutcome::Done(found) => {
                    for (node, node_edges) in found {
                        if options.limit.is_some_and(|limit| result.nodes.len() >= limit) {
                            break;
                        }
                        if !options.wants_tags(&node.tags) || !seen.insert(node.id.clone()) {
                            continue;
                        }
                        result.nodes.push(node);
                        edges.extend(node_edges);
                    }
                }
                UnitOutcome::Failed(err) => result.errors.push(err),
                UnitOutcome::Skipped => result.cancelled = true,
            }
        }
        result.edges = edges.into_edges();
        result.duration_ms = started.elapsed().as_millis() as i64;

        info!(
            units = unit_count,
            nodes = result.nodes.len(),
            edges = result.edges.len(),
            errors = result.errors.len(),
            cancelled = result.cancelled,
            "discovery finished"
        );
        result
    }

    async fn health_check(&self) -> bool {
        self.client.check().await.is_ok()
    }

    fn extract_relationships(
        &self,
        source_node_id: &str,
        source_type: ResourceType,
        raw: &Value,
        account: &str,
        region: &str,
    ) -> Vec<EdgeInput> {
        let source = RuleSource {
            node_id: source_node_id,
            provider: self.provider,
            resource_type: source_type,
            account,
            region,
        };
        self.engine.extract(&source, raw, DiscoveryMethod::ApiField)
    }
}
