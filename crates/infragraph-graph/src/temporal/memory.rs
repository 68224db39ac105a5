//! In-memory snapshot store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    capture_graph, EdgeVersion, GraphSnapshot, NodeVersion, SnapshotFilter, SnapshotStore, SnapshotTrigger,
};
use crate::error::Result;
use crate::query::{sort_nodes, NodeFilter};
use crate::schema::{CloudProvider, GraphEdge, GraphNode};
use crate::storage::{now_micros, GraphStorage};

struct Frozen {
    snapshot: GraphSnapshot,
    nodes: BTreeMap<String, GraphNode>,
    edges: BTreeMap<String, GraphEdge>,
}

#[derive(Default)]
struct State {
    snapshots: Vec<Frozen>,
    last_seq: i64,
}

impl State {
    /// Newest first.
    fn ordered(&self) -> Vec<&Frozen> {
        let mut all: Vec<&Frozen> = self.snapshots.iter().collect();
        all.sort_by(|a, b| {
            b.snapshot
                .created_at
                .cmp(&a.snapshot.created_at)
                .then_with(|| b.snapshot.seq.cmp(&a.snapshot.seq))
        });
        all
    }

    fn find(&self, id: &str) -> Option<&Frozen> {
        self.snapshots.iter().find(|f| f.snapshot.id == id)
    }
}

/// Snapshot store held in process memory.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    state: RwLock<State>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    #[instrument(skip(self, graph))]
    async fn create_snapshot(
        &self,
        graph: &dyn GraphStorage,
        trigger: SnapshotTrigger,
        label: Option<&str>,
        provider: Option<CloudProvider>,
    ) -> Result<GraphSnapshot> {
        let captured = capture_graph(graph).await?;
        let mut state = self.state.write().await;
        state.last_seq += 1;
        let snapshot = GraphSnapshot {
            id: Uuid::new_v4().to_string(),
            seq: state.last_seq,
            created_at: now_micros(),
            trigger,
            provider,
            label: label.map(str::to_string),
            node_count: captured.nodes.len() as u64,
            edge_count: captured.edges.len() as u64,
            total_cost_monthly: captured.total_cost_monthly,
        };
        state.snapshots.push(Frozen {
            snapshot: snapshot.clone(),
            nodes: captured.nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            edges: captured.edges.into_iter().map(|e| (e.id.clone(), e)).collect(),
        });
        info!(id = %snapshot.id, nodes = snapshot.node_count, edges = snapshot.edge_count, "snapshot created");
        Ok(snapshot)
    }

    async fn get_snapshot(&self, id: &str) -> Result<Option<GraphSnapshot>> {
        Ok(self.state.read().await.find(id).map(|f| f.snapshot.clone()))
    }

    async fn list_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<GraphSnapshot>> {
        let state = self.state.read().await;
        let mut snapshots: Vec<GraphSnapshot> = state
            .ordered()
            .into_iter()
            .filter(|f| filter.matches(&f.snapshot))
            .map(|f| f.snapshot.clone())
            .collect();
        if let Some(limit) = filter.limit {
            snapshots.truncate(limit);
        }
        Ok(snapshots)
    }

    async fn delete_snapshot(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.snapshots.len();
        state.snapshots.retain(|f| f.snapshot.id != id);
        Ok(state.snapshots.len() < before)
    }

    async fn get_nodes_at_snapshot(&self, snapshot_id: &str, filter: Option<&NodeFilter>) -> Result<Vec<GraphNode>> {
        if let Some(filter) = filter {
            filter.validate()?;
        }
        let state = self.state.read().await;
        let Some(frozen) = state.find(snapshot_id) else {
            return Ok(Vec::new());
        };
        let mut nodes: Vec<GraphNode> = frozen
            .nodes
            .values()
            .filter(|n| filter.map_or(true, |f| f.matches(n)))
            .cloned()
            .collect();
        sort_nodes(&mut nodes);
        Ok(nodes)
    }

    async fn get_edges_at_snapshot(&self, snapshot_id: &str) -> Result<Vec<GraphEdge>> {
        let state = self.state.read().await;
        Ok(state
            .find(snapshot_id)
            .map(|f| f.edges.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_node_history(&self, node_id: &str, limit: usize) -> Result<Vec<NodeVersion>> {
        let state = self.state.read().await;
        Ok(state
            .ordered()
            .into_iter()
            .filter_map(|f| {
                f.nodes.get(node_id).map(|node| NodeVersion {
                    snapshot_id: f.snapshot.id.clone(),
                    captured_at: f.snapshot.created_at,
                    node: node.clone(),
                })
            })
            .take(limit)
            .collect())
    }

    async fn get_edge_history(&self, edge_id: &str, limit: usize) -> Result<Vec<EdgeVersion>> {
        let state = self.state.read().await;
        Ok(state
            .ordered()
            .into_iter()
            .filter_map(|f| {
                f.edges.get(edge_id).map(|edge| EdgeVersion {
                    snapshot_id: f.snapshot.id.clone(),
                    captured_at: f.snapshot.created_at,
                    edge: edge.clone(),
                })
            })
            .take(limit)
            .collect())
    }

    async fn get_snapshot_at(&self, at: DateTime<Utc>) -> Result<Option<GraphSnapshot>> {
        let state = self.state.read().await;
        let ordered = state.ordered();
        let found = ordered
            .iter()
            .find(|f| f.snapshot.created_at <= at)
            .or_else(|| ordered.last());
        Ok(found.map(|f| f.snapshot.clone()))
    }
}
