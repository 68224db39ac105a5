//! Graph storage contract and its backends.
//!
//! [`GraphStorage`] is the single read/write surface for the live graph.
//! Two backends implement it and must behave identically:
//!
//! - [`InMemoryGraphStore`]: reference implementation for tests and one-shot runs
//! - [`SqliteGraphStore`]: persistent backend over a `sqlx` SQLite pool

mod memory;
mod sqlite;

pub use memory::InMemoryGraphStore;
pub use sqlite::SqliteGraphStore;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{GraphError, Result};
use crate::query::{
    ChangeFilter, EdgeFilter, GraphStats, NodeFilter, Page, PageOptions, Subgraph, TraversalDirection,
};
use crate::records::{GraphChange, GraphGroup, GraphGroupMember, GroupType, SyncRecord};
use crate::schema::{CloudProvider, EdgeInput, GraphEdge, GraphNode, NodeInput, RelationshipType};

/// Read/write contract for the live infrastructure graph.
///
/// Point lookups return `Ok(None)` for absence. Batch writes are atomic per
/// call: either every row lands or none does.
#[async_trait]
pub trait GraphStorage: Send + Sync {
    // Nodes

    /// Insert or replace a node, keeping its original `discovered_at`.
    async fn upsert_node(&self, node: &NodeInput) -> Result<GraphNode>;

    /// Upsert a batch of nodes atomically.
    async fn upsert_nodes(&self, nodes: &[NodeInput]) -> Result<Vec<GraphNode>>;

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>>;

    /// Look up a node by provider-native id. When several accounts or regions
    /// share the native id, the lowest node id wins.
    async fn get_node_by_native_id(&self, provider: CloudProvider, native_id: &str) -> Result<Option<GraphNode>>;

    /// All nodes matching `filter`, sorted by name then id.
    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<GraphNode>>;

    async fn query_nodes_paginated(&self, filter: &NodeFilter, page: &PageOptions) -> Result<Page<GraphNode>>;

    /// Delete a node along with its edges and group memberships.
    ///
    /// Returns whether the node existed.
    async fn delete_node(&self, id: &str) -> Result<bool>;

    /// Flag every node last seen before `older_than` as disappeared.
    ///
    /// `provider` and `account` narrow the sweep to the nodes one discovery
    /// source owns. Nodes already disappeared are left alone. Returns the
    /// affected ids, sorted.
    async fn mark_nodes_disappeared(
        &self,
        older_than: DateTime<Utc>,
        provider: Option<CloudProvider>,
        account: Option<&str>,
    ) -> Result<Vec<String>>;

    // Edges

    /// Insert or replace an edge, keeping its original `created_at`.
    async fn upsert_edge(&self, edge: &EdgeInput) -> Result<GraphEdge>;

    async fn upsert_edges(&self, edges: &[EdgeInput]) -> Result<Vec<GraphEdge>>;

    async fn get_edge(&self, id: &str) -> Result<Option<GraphEdge>>;

    async fn delete_edge(&self, id: &str) -> Result<bool>;

    /// All edges matching `filter`, sorted by id.
    async fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<GraphEdge>>;

    /// Edges incident to `node_id` in `direction`, sorted by id.
    async fn get_edges_for_node(
        &self,
        node_id: &str,
        direction: TraversalDirection,
        relationship: Option<RelationshipType>,
    ) -> Result<Vec<GraphEdge>>;

    // Traversal

    /// Breadth-first neighborhood of `node_id`.
    ///
    /// `depth` is capped at [`MAX_TRAVERSAL_DEPTH`](crate::query::MAX_TRAVERSAL_DEPTH).
    /// The result holds every stored node reached (the start node included)
    /// and every edge, matching `edge_types`, whose endpoints were both
    /// reached.
    async fn get_neighbors(
        &self,
        node_id: &str,
        depth: usize,
        direction: TraversalDirection,
        edge_types: Option<&[RelationshipType]>,
    ) -> Result<Subgraph>;

    async fn get_stats(&self) -> Result<GraphStats>;

    // Change log

    async fn append_change(&self, change: &GraphChange) -> Result<()>;

    /// Append a batch of changes atomically. A reused change id is a conflict.
    async fn append_changes(&self, changes: &[GraphChange]) -> Result<()>;

    /// Changes matching `filter`, oldest first.
    async fn get_changes(&self, filter: &ChangeFilter) -> Result<Vec<GraphChange>>;

    /// Changes targeting `node_id`, newest first.
    async fn get_node_timeline(&self, node_id: &str, limit: usize) -> Result<Vec<GraphChange>>;

    // Groups

    async fn upsert_group(&self, group: &GraphGroup) -> Result<()>;

    async fn get_group(&self, id: &str) -> Result<Option<GraphGroup>>;

    /// Groups sorted by name then id.
    async fn list_groups(&self, group_type: Option<GroupType>) -> Result<Vec<GraphGroup>>;

    /// Delete a group and its memberships. Member nodes are untouched.
    async fn delete_group(&self, id: &str) -> Result<bool>;

    /// Add a node to a group. Re-adding keeps the original `added_at`.
    async fn add_group_member(&self, group_id: &str, node_id: &str) -> Result<()>;

    async fn remove_group_member(&self, group_id: &str, node_id: &str) -> Result<bool>;

    /// Memberships of a group, sorted by node id.
    async fn get_group_members(&self, group_id: &str) -> Result<Vec<GraphGroupMember>>;

    /// Groups a node belongs to, sorted by name then id.
    async fn get_node_groups(&self, node_id: &str) -> Result<Vec<GraphGroup>>;

    // Sync records

    /// Write a sync record. Records are immutable; reusing an id is a conflict.
    async fn save_sync_record(&self, record: &SyncRecord) -> Result<()>;

    /// Most recent sync record, optionally for one provider.
    async fn get_last_sync_record(&self, provider: Option<&str>) -> Result<Option<SyncRecord>>;

    /// Sync records newest first.
    async fn list_sync_records(&self, provider: Option<&str>, limit: usize) -> Result<Vec<SyncRecord>>;
}

/// Fixed-width UTC timestamp so stored values sort lexicographically.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(column: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| GraphError::Corrupt {
            column,
            value: value.to_string(),
        })
}

pub(crate) fn parse_opt_ts(column: &'static str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(column, &v)).transpose()
}

/// Timestamps round-trip through storage at microsecond precision.
pub(crate) fn now_micros() -> DateTime<Utc> {
    truncate_micros(Utc::now())
}

pub(crate) fn truncate_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(at.timestamp_micros()).unwrap_or(at)
}

/// Decode a stored enum tag, reporting the column on failure.
pub(crate) fn parse_tag<T>(column: &'static str, value: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
    parse(value).ok_or_else(|| GraphError::Corrupt {
        column,
        value: value.to_string(),
    })
}
