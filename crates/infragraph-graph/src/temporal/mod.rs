//! Point-in-time snapshots of the graph.
//!
//! A snapshot freezes every node and edge as they existed at capture time.
//! Snapshots are immutable; pruning is the only way they go away.

mod memory;
mod sqlite;

pub use memory::InMemorySnapshotStore;
pub use sqlite::SqliteSnapshotStore;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GraphError, Result};
use crate::query::{NodeFilter, TraversalDirection};
use crate::schema::{CloudProvider, GraphEdge, GraphNode};
use crate::storage::GraphStorage;

/// What caused a snapshot to be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotTrigger {
    Manual,
    Scheduled,
    Sync,
}

impl SnapshotTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotTrigger::Manual => "manual",
            SnapshotTrigger::Scheduled => "scheduled",
            SnapshotTrigger::Sync => "sync",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(SnapshotTrigger::Manual),
            "scheduled" => Some(SnapshotTrigger::Scheduled),
            "sync" => Some(SnapshotTrigger::Sync),
            _ => None,
        }
    }
}

/// Snapshot metadata. The frozen rows live alongside, keyed by snapshot id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub id: String,
    /// Monotonic; breaks ties between snapshots with equal timestamps
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub trigger: SnapshotTrigger,
    pub provider: Option<CloudProvider>,
    pub label: Option<String>,
    pub node_count: u64,
    pub edge_count: u64,
    pub total_cost_monthly: f64,
}

/// Filter for snapshot listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFilter {
    /// Inclusive lower bound on `created_at`
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`
    pub until: Option<DateTime<Utc>>,
    pub trigger: Option<SnapshotTrigger>,
    pub provider: Option<CloudProvider>,
    pub limit: Option<usize>,
}

impl SnapshotFilter {
    pub fn matches(&self, snapshot: &GraphSnapshot) -> bool {
        self.since.map_or(true, |s| snapshot.created_at >= s)
            && self.until.map_or(true, |u| snapshot.created_at <= u)
            && self.trigger.map_or(true, |t| t == snapshot.trigger)
            && (self.provider.is_none() || self.provider == snapshot.provider)
    }
}

/// A node as frozen in one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeVersion {
    pub snapshot_id: String,
    pub captured_at: DateTime<Utc>,
    pub node: GraphNode,
}

/// An edge as frozen in one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeVersion {
    pub snapshot_id: String,
    pub captured_at: DateTime<Utc>,
    pub edge: GraphEdge,
}

/// One field that differs between two versions of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub previous: Option<String>,
    pub current: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeChange {
    pub node_id: String,
    pub fields: Vec<FieldChange>,
}

/// Differences between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub from_snapshot_id: String,
    pub to_snapshot_id: String,
    pub added_nodes: Vec<GraphNode>,
    pub removed_nodes: Vec<GraphNode>,
    pub changed_nodes: Vec<NodeChange>,
    pub added_edges: Vec<GraphEdge>,
    pub removed_edges: Vec<GraphEdge>,
    pub cost_delta: f64,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.changed_nodes.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
    }
}

/// Snapshot retention limits. Either, both or neither may be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_snapshots: Option<usize>,
    pub max_age_ms: Option<i64>,
}

impl RetentionPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_snapshots == Some(0) {
            return Err(GraphError::InvalidRetention("max_snapshots must be at least 1".into()));
        }
        if let Some(age) = self.max_age_ms {
            if age <= 0 {
                return Err(GraphError::InvalidRetention(format!("max_age_ms must be positive, got {age}")));
            }
        }
        Ok(())
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_snapshots.is_none() && self.max_age_ms.is_none()
    }
}

fn opt_string<T: ToString>(value: &Option<T>) -> Option<String> {
    value.as_ref().map(ToString::to_string)
}

fn push_change(out: &mut Vec<FieldChange>, field: &str, previous: Option<String>, current: Option<String>) {
    if previous != current {
        out.push(FieldChange {
            field: field.to_string(),
            previous,
            current,
        });
    }
}

/// Field-level differences between two versions of the same node.
///
/// Tags and metadata compare by their serialized form, which is canonical
/// because both maps keep keys sorted.
pub fn diff_node_fields(before: &GraphNode, after: &GraphNode) -> Vec<FieldChange> {
    let mut out = Vec::new();
    push_change(
        &mut out,
        "status",
        Some(before.status.as_str().to_string()),
        Some(after.status.as_str().to_string()),
    );
    push_change(&mut out, "name", Some(before.name.clone()), Some(after.name.clone()));
    push_change(&mut out, "region", Some(before.region.clone()), Some(after.region.clone()));
    push_change(&mut out, "account", Some(before.account.clone()), Some(after.account.clone()));
    push_change(&mut out, "owner", before.owner.clone(), after.owner.clone());
    push_change(
        &mut out,
        "costMonthly",
        opt_string(&before.cost_monthly),
        opt_string(&after.cost_monthly),
    );
    push_change(
        &mut out,
        "tags",
        serde_json::to_string(&before.tags).ok(),
        serde_json::to_string(&after.tags).ok(),
    );
    push_change(
        &mut out,
        "metadata",
        serde_json::to_string(&before.metadata).ok(),
        serde_json::to_string(&after.metadata).ok(),
    );
    out
}

/// Diff two frozen graphs. Output vectors are sorted by id.
pub fn diff_graphs(
    from: &GraphSnapshot,
    to: &GraphSnapshot,
    from_nodes: Vec<GraphNode>,
    to_nodes: Vec<GraphNode>,
    from_edges: Vec<GraphEdge>,
    to_edges: Vec<GraphEdge>,
) -> SnapshotDiff {
    let before: BTreeMap<String, GraphNode> = from_nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
    let mut after: BTreeMap<String, GraphNode> = to_nodes.into_iter().map(|n| (n.id.clone(), n)).collect();

    let mut removed_nodes = Vec::new();
    let mut changed_nodes = Vec::new();
    for (id, old) in before {
        match after.remove(&id) {
            None => removed_nodes.push(old),
            Some(new) => {
                let fields = diff_node_fields(&old, &new);
                if !fields.is_empty() {
                    changed_nodes.push(NodeChange { node_id: id, fields });
                }
            }
        }
    }
    let added_nodes: Vec<GraphNode> = after.into_values().collect();

    let before_edges: BTreeMap<String, GraphEdge> = from_edges.into_iter().map(|e| (e.id.clone(), e)).collect();
    let mut after_edges: BTreeMap<String, GraphEdge> = to_edges.into_iter().map(|e| (e.id.clone(), e)).collect();
    let mut removed_edges = Vec::new();
    for (id, edge) in before_edges {
        if after_edges.remove(&id).is_none() {
            removed_edges.push(edge);
        }
    }

    SnapshotDiff {
        from_snapshot_id: from.id.clone(),
        to_snapshot_id: to.id.clone(),
        added_nodes,
        removed_nodes,
        changed_nodes,
        added_edges: after_edges.into_values().collect(),
        removed_edges,
        cost_delta: to.total_cost_monthly - from.total_cost_monthly,
    }
}

/// Everything a snapshot freezes, read through the storage contract.
#[derive(Debug, Clone, Default)]
pub struct CapturedGraph {
    pub nodes: Vec<GraphNode>,
    /// Distinct edges incident to at least one stored node
    pub edges: Vec<GraphEdge>,
    pub total_cost_monthly: f64,
}

/// Read the whole live graph.
pub async fn capture_graph(graph: &dyn GraphStorage) -> Result<CapturedGraph> {
    let nodes = graph.query_nodes(&NodeFilter::default()).await?;
    let mut edges: HashMap<String, GraphEdge> = HashMap::new();
    for node in &nodes {
        for edge in graph.get_edges_for_node(&node.id, TraversalDirection::Both, None).await? {
            edges.entry(edge.id.clone()).or_insert(edge);
        }
    }
    let mut edges: Vec<GraphEdge> = edges.into_values().collect();
    edges.sort_by(|a, b| a.id.cmp(&b.id));
    let total_cost_monthly = nodes.iter().filter_map(|n| n.cost_monthly).sum();
    debug!(nodes = nodes.len(), edges = edges.len(), "captured graph");
    Ok(CapturedGraph {
        nodes,
        edges,
        total_cost_monthly,
    })
}

/// Storage for snapshots and their frozen versions.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Freeze the current contents of `graph` in one atomic write.
    ///
    /// `provider` and `label` annotate the snapshot; the whole graph is
    /// captured either way.
    async fn create_snapshot(
        &self,
        graph: &dyn GraphStorage,
        trigger: SnapshotTrigger,
        label: Option<&str>,
        provider: Option<CloudProvider>,
    ) -> Result<GraphSnapshot>;

    async fn get_snapshot(&self, id: &str) -> Result<Option<GraphSnapshot>>;

    /// Snapshots newest first.
    async fn list_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<GraphSnapshot>>;

    /// Delete a snapshot and its versions.
    async fn delete_snapshot(&self, id: &str) -> Result<bool>;

    /// Nodes frozen in a snapshot, sorted by name then id. Unknown snapshots
    /// yield nothing.
    async fn get_nodes_at_snapshot(&self, snapshot_id: &str, filter: Option<&NodeFilter>) -> Result<Vec<GraphNode>>;

    /// Edges frozen in a snapshot, sorted by id.
    async fn get_edges_at_snapshot(&self, snapshot_id: &str) -> Result<Vec<GraphEdge>>;

    /// Versions of one node across snapshots, newest first.
    async fn get_node_history(&self, node_id: &str, limit: usize) -> Result<Vec<NodeVersion>>;

    /// Versions of one edge across snapshots, newest first.
    async fn get_edge_history(&self, edge_id: &str, limit: usize) -> Result<Vec<EdgeVersion>>;

    /// Latest snapshot taken at or before `at`, or the oldest one when every
    /// snapshot is newer.
    async fn get_snapshot_at(&self, at: DateTime<Utc>) -> Result<Option<GraphSnapshot>>;

    async fn diff_snapshots(&self, from_id: &str, to_id: &str) -> Result<SnapshotDiff> {
        let from = self
            .get_snapshot(from_id)
            .await?
            .ok_or_else(|| GraphError::SnapshotNotFound(from_id.to_string()))?;
        let to = self
            .get_snapshot(to_id)
            .await?
            .ok_or_else(|| GraphError::SnapshotNotFound(to_id.to_string()))?;

        let from_nodes = self.get_nodes_at_snapshot(from_id, None).await?;
        let to_nodes = self.get_nodes_at_snapshot(to_id, None).await?;
        let from_edges = self.get_edges_at_snapshot(from_id).await?;
        let to_edges = self.get_edges_at_snapshot(to_id).await?;

        Ok(diff_graphs(&from, &to, from_nodes, to_nodes, from_edges, to_edges))
    }

    /// Delete every snapshot ranked past `max_snapshots` or older than
    /// `max_age_ms`. Returns how many were deleted.
    async fn prune_snapshots(&self, policy: &RetentionPolicy) -> Result<usize> {
        policy.validate()?;
        if policy.is_unbounded() {
            return Ok(0);
        }

        let cutoff = policy
            .max_age_ms
            .and_then(|ms| Utc::now().checked_sub_signed(Duration::milliseconds(ms)));
        let snapshots = self.list_snapshots(&SnapshotFilter::default()).await?;

        let mut deleted = 0;
        for (rank, snapshot) in snapshots.iter().enumerate() {
            let over_count = policy.max_snapshots.is_some_and(|max| rank >= max);
            let too_old = cutoff.is_some_and(|cutoff| snapshot.created_at < cutoff);
            if (over_count || too_old) && self.delete_snapshot(&snapshot.id).await? {
                deleted += 1;
            }
        }

        info!(deleted, "pruned snapshots");
        Ok(deleted)
    }
}
