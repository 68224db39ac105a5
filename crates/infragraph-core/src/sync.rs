//! Sync pipeline: discovery results into storage, the change log and
//! snapshots.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{SubsecRound, Utc};
use infragraph_graph::temporal::diff_node_fields;
use infragraph_graph::{
    placeholder_node, ChangeType, EdgeInput, GraphChange, GraphEdge, GraphNode, GraphSnapshot, GraphStorage,
    InitiatorType, NodeInput, RetentionPolicy, SnapshotDiff, SnapshotFilter, SnapshotStore, SnapshotTrigger,
    SyncRecord, SyncStatus,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{DiscoverOptions, DiscoveryAdapter, DiscoveryResult};
use crate::config::InfraConfig;

/// Initiator recorded on every change a sync writes.
pub const SYNC_INITIATOR: &str = "infragraph-sync";

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub synthesize_placeholders: bool,
    pub snapshot_on_sync: bool,
    pub retention: RetentionPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            synthesize_placeholders: true,
            snapshot_on_sync: true,
            retention: RetentionPolicy::default(),
        }
    }
}

impl From<&InfraConfig> for SyncSettings {
    fn from(config: &InfraConfig) -> Self {
        Self {
            synthesize_placeholders: config.sync.synthesize_placeholders,
            snapshot_on_sync: config.sync.snapshot_on_sync,
            retention: config.retention.policy(),
        }
    }
}

/// What one sync run did.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub record: SyncRecord,
    pub placeholders_created: u64,
    pub changes_recorded: usize,
    pub snapshot: Option<GraphSnapshot>,
    /// Difference from the snapshot before this run's snapshot.
    pub diff: Option<SnapshotDiff>,
    pub snapshots_pruned: usize,
}

/// Runs adapters against one graph and its snapshot store.
#[derive(Clone)]
pub struct SyncEngine {
    storage: Arc<dyn GraphStorage>,
    snapshots: Arc<dyn SnapshotStore>,
    settings: SyncSettings,
}

/// Change records for one run, all sharing the sync record id.
struct ChangeLog {
    correlation_id: String,
    detected_via: String,
    changes: Vec<GraphChange>,
}

impl ChangeLog {
    fn new(correlation_id: &str, detected_via: &str) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            detected_via: detected_via.to_string(),
            changes: Vec::new(),
        }
    }

    fn push(&mut self, target_id: &str, change_type: ChangeType) -> &mut GraphChange {
        let change = GraphChange::new(target_id, change_type, &self.detected_via)
            .with_correlation(&self.correlation_id)
            .with_initiator(SYNC_INITIATOR, InitiatorType::System);
        self.changes.push(change);
        let last = self.changes.len() - 1;
        &mut self.changes[last]
    }

    fn push_field(
        &mut self,
        target_id: &str,
        change_type: ChangeType,
        field: &str,
        previous: Option<String>,
        current: Option<String>,
    ) {
        let change = self.push(target_id, change_type);
        change.field = Some(field.to_string());
        change.previous_value = previous;
        change.new_value = current;
    }
}

#[derive(Default)]
struct Counts {
    nodes_created: u64,
    nodes_updated: u64,
    nodes_disappeared: u64,
    edges_created: u64,
    edges_updated: u64,
    placeholders: u64,
}

impl SyncEngine {
    pub fn new(storage: Arc<dyn GraphStorage>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            storage,
            snapshots,
            settings: SyncSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn storage(&self) -> &Arc<dyn GraphStorage> {
        &self.storage
    }

    pub fn snapshots(&self) -> &Arc<dyn SnapshotStore> {
        &self.snapshots
    }

    /// Discover with `adapter` and reconcile the result into the graph.
    #[instrument(skip(self, adapter, options), fields(adapter = %adapter.name()))]
    pub async fn run(&self, adapter: &dyn DiscoveryAdapter, options: &DiscoverOptions) -> Result<SyncOutcome> {
        // Stored timestamps have microsecond precision
        let run_start = Utc::now().trunc_subsecs(6);
        let record_id = Uuid::new_v4().to_string();
        let mut log = ChangeLog::new(&record_id, adapter.name());
        let mut counts = Counts::default();

        let result = adapter.discover(options).await;

        let nodes = dedup_nodes(&result.nodes);
        self.classify_nodes(&nodes, &mut log, &mut counts).await?;
        self.storage
            .upsert_nodes(&nodes)
            .await
            .context("Failed to write discovered nodes")?;

        if self.settings.synthesize_placeholders {
            self.synthesize_placeholders(&nodes, &result.edges, &mut log, &mut counts)
                .await?;
        }

        self.classify_edges(&result.edges, &mut log, &mut counts).await?;
        self.storage
            .upsert_edges(&result.edges)
            .await
            .context("Failed to write discovered edges")?;

        if result.cancelled || !result.errors.is_empty() {
            warn!(
                cancelled = result.cancelled,
                errors = result.errors.len(),
                "incomplete discovery, skipping disappearance pass"
            );
        } else {
            let gone = self
                .storage
                .mark_nodes_disappeared(run_start, Some(result.provider), adapter.account())
                .await?;
            for id in &gone {
                log.push_field(id, ChangeType::NodeDisappeared, "status", None, Some("disappeared".into()));
            }
            counts.nodes_disappeared = gone.len() as u64;
        }

        let changes_recorded = log.changes.len();
        self.storage
            .append_changes(&log.changes)
            .await
            .context("Failed to record changes")?;

        let record = sync_record(record_id, adapter.name(), run_start, &result, &counts);
        self.storage.save_sync_record(&record).await?;
        info!(
            status = record.status.as_str(),
            created = counts.nodes_created,
            updated = counts.nodes_updated,
            disappeared = counts.nodes_disappeared,
            edges = record.edges_discovered,
            "sync finished"
        );

        let mut outcome = SyncOutcome {
            record,
            placeholders_created: counts.placeholders,
            changes_recorded,
            snapshot: None,
            diff: None,
            snapshots_pruned: 0,
        };
        if self.settings.snapshot_on_sync && outcome.record.status != SyncStatus::Failed {
            self.snapshot_after_sync(&mut outcome, adapter).await?;
        }
        Ok(outcome)
    }

    async fn classify_nodes(&self, nodes: &[NodeInput], log: &mut ChangeLog, counts: &mut Counts) -> Result<()> {
        let now = Utc::now();
        for input in nodes {
            match self.storage.get_node(&input.id).await? {
                None => {
                    log.push(&input.id, ChangeType::NodeCreated);
                    counts.nodes_created += 1;
                }
                Some(existing) => {
                    let incoming = GraphNode::from_input(input, Some(existing.discovered_at), now);
                    let fields = diff_node_fields(&existing, &incoming);
                    if fields.is_empty() {
                        continue;
                    }
                    for field in fields {
                        log.push_field(&input.id, ChangeType::NodeUpdated, &field.field, field.previous, field.current);
                    }
                    counts.nodes_updated += 1;
                }
            }
        }
        Ok(())
    }

    /// Make sure every edge endpoint exists as a node.
    ///
    /// Missing endpoints get a flagged placeholder; placeholders that are
    /// still referenced are refreshed so they do not disappear.
    async fn synthesize_placeholders(
        &self,
        nodes: &[NodeInput],
        edges: &[EdgeInput],
        log: &mut ChangeLog,
        counts: &mut Counts,
    ) -> Result<()> {
        let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut checked = HashSet::new();
        let mut placeholders = Vec::new();

        for id in edges
            .iter()
            .flat_map(|e| [e.source_node_id.as_str(), e.target_node_id.as_str()])
        {
            if known.contains(id) || !checked.insert(id) {
                continue;
            }
            let existing = self.storage.get_node(id).await?;
            if existing.as_ref().is_some_and(|n| !n.is_placeholder()) {
                continue;
            }
            let Some(placeholder) = placeholder_node(id) else {
                warn!(node_id = id, "edge endpoint is not a valid node id");
                continue;
            };
            if existing.is_none() {
                log.push(id, ChangeType::NodeCreated);
                counts.placeholders += 1;
            }
            placeholders.push(placeholder);
        }

        if !placeholders.is_empty() {
            self.storage
                .upsert_nodes(&placeholders)
                .await
                .context("Failed to write placeholder nodes")?;
        }
        Ok(())
    }

    async fn classify_edges(&self, edges: &[EdgeInput], log: &mut ChangeLog, counts: &mut Counts) -> Result<()> {
        for input in edges {
            match self.storage.get_edge(&input.id).await? {
                None => {
                    log.push(&input.id, ChangeType::EdgeCreated);
                    counts.edges_created += 1;
                }
                Some(existing) if edge_changed(&existing, input) => {
                    log.push(&input.id, ChangeType::EdgeUpdated);
                    counts.edges_updated += 1;
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    async fn snapshot_after_sync(&self, outcome: &mut SyncOutcome, adapter: &dyn DiscoveryAdapter) -> Result<()> {
        let previous = self
            .snapshots
            .list_snapshots(&SnapshotFilter {
                limit: Some(1),
                ..SnapshotFilter::default()
            })
            .await?
            .into_iter()
            .next();

        let label = format!("sync {}", adapter.name());
        let snapshot = self
            .snapshots
            .create_snapshot(
                self.storage.as_ref(),
                SnapshotTrigger::Sync,
                Some(&label),
                Some(adapter.provider()),
            )
            .await
            .context("Failed to capture snapshot")?;

        if let Some(previous) = previous {
            let diff = self.snapshots.diff_snapshots(&previous.id, &snapshot.id).await?;
            info!(
                added = diff.added_nodes.len(),
                removed = diff.removed_nodes.len(),
                changed = diff.changed_nodes.len(),
                cost_delta = diff.cost_delta,
                "graph changed since previous snapshot"
            );
            outcome.diff = Some(diff);
        }

        if !self.settings.retention.is_unbounded() {
            outcome.snapshots_pruned = self.snapshots.prune_snapshots(&self.settings.retention).await?;
        }
        outcome.snapshot = Some(snapshot);
        Ok(())
    }
}

/// First occurrence of each node id wins.
fn dedup_nodes(nodes: &[NodeInput]) -> Vec<NodeInput> {
    let mut seen = HashSet::new();
    nodes
        .iter()
        .filter(|n| seen.insert(n.id.as_str()))
        .cloned()
        .collect()
}

fn edge_changed(existing: &GraphEdge, input: &EdgeInput) -> bool {
    existing.confidence != input.confidence
        || existing.discovered_via != input.discovered_via
        || existing.metadata != input.metadata
}

fn sync_status(result: &DiscoveryResult) -> SyncStatus {
    if result.cancelled {
        SyncStatus::Cancelled
    } else if result.errors.is_empty() {
        SyncStatus::Completed
    } else if result.nodes.is_empty() {
        SyncStatus::Failed
    } else {
        SyncStatus::Partial
    }
}

fn sync_record(
    id: String,
    adapter: &str,
    started_at: chrono::DateTime<Utc>,
    result: &DiscoveryResult,
    counts: &Counts,
) -> SyncRecord {
    let completed_at = Utc::now().trunc_subsecs(6);
    SyncRecord {
        id,
        provider: adapter.to_string(),
        status: sync_status(result),
        started_at,
        completed_at,
        duration_ms: (completed_at - started_at).num_milliseconds(),
        nodes_discovered: result.nodes.len() as u64,
        nodes_created: counts.nodes_created,
        nodes_updated: counts.nodes_updated,
        nodes_disappeared: counts.nodes_disappeared,
        edges_discovered: result.edges.len() as u64,
        edges_created: counts.edges_created,
        edges_updated: counts.edges_updated,
        errors: result.errors.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FixtureClient, RuleDrivenAdapter};
    use crate::config::ServiceMapping;
    use infragraph_graph::{
        ChangeFilter, CloudProvider, InMemoryGraphStore, InMemorySnapshotStore, NodeStatus, ResourceType,
    };
    use serde_json::{json, Value};

    fn adapter(document: Value) -> RuleDrivenAdapter {
        RuleDrivenAdapter::new("aws", CloudProvider::Aws, "123", Arc::new(FixtureClient::from_value(document)))
            .with_regions(vec!["us-east-1".into()])
            .with_service(ServiceMapping {
                tags_field: Some("Tags".into()),
                status_field: Some("State".into()),
                ..ServiceMapping::new("ec2", ResourceType::Compute, "InstanceId")
            })
            .with_service(ServiceMapping::new("vpc", ResourceType::Vpc, "VpcId"))
    }

    fn engine() -> SyncEngine {
        SyncEngine::new(Arc::new(InMemoryGraphStore::new()), Arc::new(InMemorySnapshotStore::new()))
    }

    fn first_run() -> Value {
        json!({ "us-east-1": {
            "ec2": [
                { "InstanceId": "i-1", "State": "running", "VpcId": "vpc-1", "SubnetId": "subnet-1" },
                { "InstanceId": "i-2", "State": "running", "VpcId": "vpc-1" }
            ],
            "vpc": [{ "VpcId": "vpc-1" }]
        }})
    }

    #[tokio::test]
    async fn test_first_sync_creates_everything() {
        let engine = engine();
        let outcome = engine
            .run(&adapter(first_run()), &DiscoverOptions::default())
            .await
            .unwrap();

        let record = &outcome.record;
        assert_eq!(record.status, SyncStatus::Completed);
        assert_eq!(record.provider, "aws");
        assert_eq!(record.nodes_discovered, 3);
        assert_eq!(record.nodes_created, 3);
        assert_eq!(record.edges_created, 3);
        // subnet-1 was referenced but never discovered
        assert_eq!(outcome.placeholders_created, 1);
        let subnet = engine
            .storage()
            .get_node("aws:123:us-east-1:subnet:subnet-1")
            .await
            .unwrap()
            .unwrap();
        assert!(subnet.is_placeholder());

        let changes = engine
            .storage()
            .get_changes(&ChangeFilter {
                correlation_id: Some(record.id.clone()),
                ..ChangeFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(changes.len(), outcome.changes_recorded);
        assert!(changes
            .iter()
            .all(|c| c.initiator.as_deref() == Some(SYNC_INITIATOR) && c.initiator_type == Some(InitiatorType::System)));

        assert!(outcome.snapshot.is_some());
        assert!(outcome.diff.is_none());
    }

    #[tokio::test]
    async fn test_second_sync_records_updates_and_disappearance() {
        let engine = engine();
        engine
            .run(&adapter(first_run()), &DiscoverOptions::default())
            .await
            .unwrap();

        let second = json!({ "us-east-1": {
            "ec2": [{ "InstanceId": "i-1", "State": "stopped", "VpcId": "vpc-1", "SubnetId": "subnet-1" }],
            "vpc": [{ "VpcId": "vpc-1" }]
        }});
        let outcome = engine
            .run(&adapter(second), &DiscoverOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.record.nodes_created, 0);
        assert_eq!(outcome.record.nodes_updated, 1);
        assert_eq!(outcome.record.nodes_disappeared, 1);
        assert_eq!(outcome.record.edges_created, 0);

        let gone = engine
            .storage()
            .get_node("aws:123:us-east-1:compute:i-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gone.status, NodeStatus::Disappeared);
        // still referenced, so refreshed rather than marked
        let subnet = engine
            .storage()
            .get_node("aws:123:us-east-1:subnet:subnet-1")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(subnet.status, NodeStatus::Disappeared);

        let timeline = engine
            .storage()
            .get_node_timeline("aws:123:us-east-1:compute:i-1", 10)
            .await
            .unwrap();
        let update = timeline
            .iter()
            .find(|c| c.change_type == ChangeType::NodeUpdated)
            .unwrap();
        assert_eq!(update.field.as_deref(), Some("status"));
        assert_eq!(update.previous_value.as_deref(), Some("running"));
        assert_eq!(update.new_value.as_deref(), Some("stopped"));

        let diff = outcome.diff.unwrap();
        assert_eq!(diff.changed_nodes.len(), 2);
    }

    fn account_adapter(name: &str, account: &str, instance: &str) -> RuleDrivenAdapter {
        let document = json!({ "us-east-1": { "ec2": [{ "InstanceId": instance }] } });
        RuleDrivenAdapter::new(name, CloudProvider::Aws, account, Arc::new(FixtureClient::from_value(document)))
            .with_regions(vec!["us-east-1".into()])
            .with_service(ServiceMapping::new("ec2", ResourceType::Compute, "InstanceId"))
    }

    #[tokio::test]
    async fn test_same_provider_adapters_reconcile_their_own_accounts() {
        let engine = engine();
        let prod = account_adapter("prod", "111", "i-prod");
        let staging = account_adapter("staging", "222", "i-staging");

        engine.run(&prod, &DiscoverOptions::default()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let outcome = engine.run(&staging, &DiscoverOptions::default()).await.unwrap();

        assert_eq!(outcome.record.provider, "staging");
        assert_eq!(outcome.record.nodes_disappeared, 0);
        let prod_node = engine
            .storage()
            .get_node("aws:111:us-east-1:compute:i-prod")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(prod_node.status, NodeStatus::Disappeared);

        // A later prod run that no longer sees its instance flags only that one
        let emptied = RuleDrivenAdapter::new(
            "prod",
            CloudProvider::Aws,
            "111",
            Arc::new(FixtureClient::from_value(json!({ "us-east-1": { "ec2": [] } }))),
        )
        .with_regions(vec!["us-east-1".into()])
        .with_service(ServiceMapping::new("ec2", ResourceType::Compute, "InstanceId"));
        let outcome = engine.run(&emptied, &DiscoverOptions::default()).await.unwrap();
        assert_eq!(outcome.record.nodes_disappeared, 1);
        let staging_node = engine
            .storage()
            .get_node("aws:222:us-east-1:compute:i-staging")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(staging_node.status, NodeStatus::Disappeared);
    }

    #[tokio::test]
    async fn test_partial_sync_skips_disappearance() {
        let engine = engine();
        engine
            .run(&adapter(first_run()), &DiscoverOptions::default())
            .await
            .unwrap();

        let broken = json!({ "us-east-1": {
            "ec2": { "unexpected": "shape" },
            "vpc": [{ "VpcId": "vpc-1" }]
        }});
        let outcome = engine
            .run(&adapter(broken), &DiscoverOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.record.status, SyncStatus::Partial);
        assert_eq!(outcome.record.errors.len(), 1);
        assert_eq!(outcome.record.nodes_disappeared, 0);
        let i1 = engine
            .storage()
            .get_node("aws:123:us-east-1:compute:i-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(i1.status, NodeStatus::Running);
    }

    #[tokio::test]
    async fn test_cancelled_sync_is_recorded() {
        let engine = engine().with_settings(SyncSettings {
            snapshot_on_sync: false,
            ..SyncSettings::default()
        });
        let options = DiscoverOptions::default();
        options.cancel.cancel();
        let outcome = engine.run(&adapter(first_run()), &options).await.unwrap();

        assert_eq!(outcome.record.status, SyncStatus::Cancelled);
        assert!(outcome.snapshot.is_none());
        let last = engine.storage().get_last_sync_record(Some("aws")).await.unwrap().unwrap();
        assert_eq!(last.id, outcome.record.id);
    }

    #[tokio::test]
    async fn test_retention_applied_after_sync() {
        let engine = engine().with_settings(SyncSettings {
            retention: RetentionPolicy {
                max_snapshots: Some(2),
                max_age_ms: None,
            },
            ..SyncSettings::default()
        });
        for _ in 0..3 {
            engine
                .run(&adapter(first_run()), &DiscoverOptions::default())
                .await
                .unwrap();
        }
        let snapshots = engine
            .snapshots()
            .list_snapshots(&SnapshotFilter::default())
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots.iter().all(|s| s.trigger == SnapshotTrigger::Sync));
    }

    #[test]
    fn test_dedup_keeps_first() {
        let a = NodeInput::new(CloudProvider::Aws, "1", "r", ResourceType::Compute, "x").with_name("first");
        let b = a.clone().with_name("second");
        let nodes = dedup_nodes(&[a, b]);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "first");
    }
}
