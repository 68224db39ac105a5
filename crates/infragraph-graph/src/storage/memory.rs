//! In-memory graph backend.
//!
//! One `RwLock` guards the whole state, and every batch runs under a single
//! write guard, so batches are atomic with respect to other callers. Meant
//! for tests, fixtures and one-shot runs; nothing is persisted.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::{now_micros, truncate_micros, GraphStorage};
use crate::error::{GraphError, Result};
use crate::query::{
    sort_nodes, ChangeFilter, EdgeFilter, GraphStats, NodeFilter, Page, PageOptions, Subgraph,
    TraversalDirection, MAX_TRAVERSAL_DEPTH,
};
use crate::records::{GraphChange, GraphGroup, GraphGroupMember, GroupType, SyncRecord};
use crate::schema::{
    CloudProvider, EdgeInput, GraphEdge, GraphNode, NodeInput, NodeStatus, RelationshipType,
};

#[derive(Default)]
struct State {
    nodes: HashMap<String, GraphNode>,
    edges: HashMap<String, GraphEdge>,
    /// Append order doubles as the tie-break for equal timestamps
    changes: Vec<GraphChange>,
    groups: HashMap<String, GraphGroup>,
    /// (group_id, node_id) -> added_at
    members: BTreeMap<(String, String), DateTime<Utc>>,
    sync_records: Vec<SyncRecord>,
}

impl State {
    fn put_node(&mut self, input: &NodeInput, now: DateTime<Utc>) -> GraphNode {
        let discovered_at = self.nodes.get(&input.id).map(|n| n.discovered_at);
        let node = GraphNode::from_input(input, discovered_at, now);
        self.nodes.insert(node.id.clone(), node.clone());
        node
    }

    fn put_edge(&mut self, input: &EdgeInput, now: DateTime<Utc>) -> GraphEdge {
        let created_at = self.edges.get(&input.id).map(|e| e.created_at);
        let edge = GraphEdge::from_input(input, created_at, now);
        self.edges.insert(edge.id.clone(), edge.clone());
        edge
    }

    fn sorted_edges<'a>(&self, edges: impl Iterator<Item = &'a GraphEdge>) -> Vec<GraphEdge> {
        let mut out: Vec<GraphEdge> = edges.cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    fn sorted_groups<'a>(&self, groups: impl Iterator<Item = &'a GraphGroup>) -> Vec<GraphGroup> {
        let mut out: Vec<GraphGroup> = groups.cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Sync records newest first; later appends win ties.
    fn sync_records_desc(&self, provider: Option<&str>) -> Vec<SyncRecord> {
        let mut records: Vec<SyncRecord> = self
            .sync_records
            .iter()
            .rev()
            .filter(|r| provider.map_or(true, |p| r.provider == p))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }
}

/// Graph storage held entirely in process memory.
#[derive(Default)]
pub struct InMemoryGraphStore {
    state: RwLock<State>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStorage for InMemoryGraphStore {
    async fn upsert_node(&self, node: &NodeInput) -> Result<GraphNode> {
        let mut state = self.state.write().await;
        Ok(state.put_node(node, now_micros()))
    }

    #[instrument(skip_all, fields(count = nodes.len()))]
    async fn upsert_nodes(&self, nodes: &[NodeInput]) -> Result<Vec<GraphNode>> {
        let now = now_micros();
        let mut state = self.state.write().await;
        Ok(nodes.iter().map(|n| state.put_node(n, now)).collect())
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        Ok(self.state.read().await.nodes.get(id).cloned())
    }

    async fn get_node_by_native_id(&self, provider: CloudProvider, native_id: &str) -> Result<Option<GraphNode>> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .values()
            .filter(|n| n.provider == provider && n.native_id == native_id)
            .min_by(|a, b| a.id.cmp(&b.id))
            .cloned())
    }

    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<GraphNode>> {
        filter.validate()?;
        let state = self.state.read().await;
        let mut nodes: Vec<GraphNode> = state.nodes.values().filter(|n| filter.matches(n)).cloned().collect();
        sort_nodes(&mut nodes);
        Ok(nodes)
    }

    async fn query_nodes_paginated(&self, filter: &NodeFilter, page: &PageOptions) -> Result<Page<GraphNode>> {
        let offset = page.offset()?;
        let limit = page.effective_limit();
        let nodes = self.query_nodes(filter).await?;
        let total = nodes.len();
        let items = nodes.into_iter().skip(offset).take(limit).collect();
        Ok(Page::from_window(items, offset, limit, total))
    }

    #[instrument(skip(self))]
    async fn delete_node(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let existed = state.nodes.remove(id).is_some();
        state.edges.retain(|_, e| !e.touches(id));
        state.members.retain(|(_, node_id), _| node_id != id);
        Ok(existed)
    }

    #[instrument(skip(self))]
    async fn mark_nodes_disappeared(
        &self,
        older_than: DateTime<Utc>,
        provider: Option<CloudProvider>,
        account: Option<&str>,
    ) -> Result<Vec<String>> {
        let now = now_micros();
        let cutoff = truncate_micros(older_than);
        let mut state = self.state.write().await;
        let mut ids = Vec::new();
        for node in state.nodes.values_mut() {
            if node.last_seen_at < cutoff
                && node.status != NodeStatus::Disappeared
                && provider.map_or(true, |p| p == node.provider)
                && account.map_or(true, |a| a == node.account)
            {
                node.status = NodeStatus::Disappeared;
                node.updated_at = now;
                ids.push(node.id.clone());
            }
        }
        ids.sort();
        debug!(count = ids.len(), "marked nodes disappeared");
        Ok(ids)
    }

    async fn upsert_edge(&self, edge: &EdgeInput) -> Result<GraphEdge> {
        let mut state = self.state.write().await;
        Ok(state.put_edge(edge, now_micros()))
    }

    #[instrument(skip_all, fields(count = edges.len()))]
    async fn upsert_edges(&self, edges: &[EdgeInput]) -> Result<Vec<GraphEdge>> {
        let now = now_micros();
        let mut state = self.state.write().await;
        Ok(edges.iter().map(|e| state.put_edge(e, now)).collect())
    }

    async fn get_edge(&self, id: &str) -> Result<Option<GraphEdge>> {
        Ok(self.state.read().await.edges.get(id).cloned())
    }

    async fn delete_edge(&self, id: &str) -> Result<bool> {
        Ok(self.state.write().await.edges.remove(id).is_some())
    }

    async fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<GraphEdge>> {
        let state = self.state.read().await;
        Ok(state.sorted_edges(state.edges.values().filter(|e| filter.matches(e))))
    }

    async fn get_edges_for_node(
        &self,
        node_id: &str,
        direction: TraversalDirection,
        relationship: Option<RelationshipType>,
    ) -> Result<Vec<GraphEdge>> {
        let state = self.state.read().await;
        Ok(state.sorted_edges(state.edges.values().filter(|e| {
            direction.includes(e, node_id) && relationship.map_or(true, |r| r == e.relationship_type)
        })))
    }

    #[instrument(skip(self, edge_types))]
    async fn get_neighbors(
        &self,
        node_id: &str,
        depth: usize,
        direction: TraversalDirection,
        edge_types: Option<&[RelationshipType]>,
    ) -> Result<Subgraph> {
        let max_depth = depth.min(MAX_TRAVERSAL_DEPTH);
        let state = self.state.read().await;
        let type_ok = |e: &GraphEdge| edge_types.map_or(true, |types| types.contains(&e.relationship_type));

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in state.edges.values().filter(|e| type_ok(e)) {
            let (source, target) = (edge.source_node_id.as_str(), edge.target_node_id.as_str());
            if direction != TraversalDirection::Upstream {
                adjacency.entry(source).or_default().push(target);
            }
            if direction != TraversalDirection::Downstream {
                adjacency.entry(target).or_default().push(source);
            }
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
        visited.insert(node_id);
        queue.push_back((node_id, 0));

        while let Some((current, level)) = queue.pop_front() {
            if level >= max_depth {
                continue;
            }
            for &next in adjacency.get(current).into_iter().flatten() {
                if visited.insert(next) {
                    queue.push_back((next, level + 1));
                }
            }
        }

        let mut nodes: Vec<GraphNode> = visited.iter().filter_map(|id| state.nodes.get(*id)).cloned().collect();
        sort_nodes(&mut nodes);
        let edges = state.sorted_edges(state.edges.values().filter(|e| {
            type_ok(e) && visited.contains(e.source_node_id.as_str()) && visited.contains(e.target_node_id.as_str())
        }));
        Ok(Subgraph { nodes, edges })
    }

    async fn get_stats(&self) -> Result<GraphStats> {
        let state = self.state.read().await;
        let mut stats = GraphStats {
            total_nodes: state.nodes.len() as u64,
            total_edges: state.edges.len() as u64,
            total_changes: state.changes.len() as u64,
            total_groups: state.groups.len() as u64,
            ..GraphStats::default()
        };
        for node in state.nodes.values() {
            *stats.nodes_by_provider.entry(node.provider.as_str().to_string()).or_default() += 1;
            *stats
                .nodes_by_resource_type
                .entry(node.resource_type.as_str().to_string())
                .or_default() += 1;
            stats.total_cost_monthly += node.cost_monthly.unwrap_or(0.0);
        }
        for edge in state.edges.values() {
            *stats
                .edges_by_relationship_type
                .entry(edge.relationship_type.as_str().to_string())
                .or_default() += 1;
        }
        stats.last_sync_at = state.sync_records.iter().map(|r| r.completed_at).max();
        stats.oldest_change_at = state.changes.iter().map(|c| c.detected_at).min();
        stats.newest_change_at = state.changes.iter().map(|c| c.detected_at).max();
        Ok(stats)
    }

    async fn append_change(&self, change: &GraphChange) -> Result<()> {
        self.append_changes(std::slice::from_ref(change)).await
    }

    async fn append_changes(&self, changes: &[GraphChange]) -> Result<()> {
        let mut state = self.state.write().await;
        let mut seen: HashSet<&str> = state.changes.iter().map(|c| c.id.as_str()).collect();
        for change in changes {
            if !seen.insert(change.id.as_str()) {
                return Err(GraphError::Conflict(change.id.clone()));
            }
        }
        state.changes.extend(changes.iter().cloned());
        Ok(())
    }

    async fn get_changes(&self, filter: &ChangeFilter) -> Result<Vec<GraphChange>> {
        let state = self.state.read().await;
        let mut changes: Vec<GraphChange> = state.changes.iter().filter(|c| filter.matches(c)).cloned().collect();
        changes.sort_by(|a, b| a.detected_at.cmp(&b.detected_at));
        if let Some(limit) = filter.limit {
            changes.truncate(limit);
        }
        Ok(changes)
    }

    async fn get_node_timeline(&self, node_id: &str, limit: usize) -> Result<Vec<GraphChange>> {
        let state = self.state.read().await;
        let mut changes: Vec<GraphChange> = state
            .changes
            .iter()
            .rev()
            .filter(|c| c.target_id == node_id)
            .cloned()
            .collect();
        changes.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        changes.truncate(limit);
        Ok(changes)
    }

    async fn upsert_group(&self, group: &GraphGroup) -> Result<()> {
        let mut state = self.state.write().await;
        let mut group = group.clone();
        if let Some(existing) = state.groups.get(&group.id) {
            group.created_at = existing.created_at;
        }
        state.groups.insert(group.id.clone(), group);
        Ok(())
    }

    async fn get_group(&self, id: &str) -> Result<Option<GraphGroup>> {
        Ok(self.state.read().await.groups.get(id).cloned())
    }

    async fn list_groups(&self, group_type: Option<GroupType>) -> Result<Vec<GraphGroup>> {
        let state = self.state.read().await;
        Ok(state.sorted_groups(
            state
                .groups
                .values()
                .filter(|g| group_type.map_or(true, |t| t == g.group_type)),
        ))
    }

    async fn delete_group(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        state.members.retain(|(group_id, _), _| group_id != id);
        Ok(state.groups.remove(id).is_some())
    }

    async fn add_group_member(&self, group_id: &str, node_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.groups.contains_key(group_id) {
            return Err(GraphError::GroupNotFound(group_id.to_string()));
        }
        state
            .members
            .entry((group_id.to_string(), node_id.to_string()))
            .or_insert_with(now_micros);
        Ok(())
    }

    async fn remove_group_member(&self, group_id: &str, node_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .members
            .remove(&(group_id.to_string(), node_id.to_string()))
            .is_some())
    }

    async fn get_group_members(&self, group_id: &str) -> Result<Vec<GraphGroupMember>> {
        let state = self.state.read().await;
        Ok(state
            .members
            .iter()
            .filter(|((g, _), _)| g == group_id)
            .map(|((g, n), added_at)| GraphGroupMember {
                group_id: g.clone(),
                node_id: n.clone(),
                added_at: *added_at,
            })
            .collect())
    }

    async fn get_node_groups(&self, node_id: &str) -> Result<Vec<GraphGroup>> {
        let state = self.state.read().await;
        let group_ids: HashSet<&str> = state
            .members
            .keys()
            .filter(|(_, n)| n == node_id)
            .map(|(g, _)| g.as_str())
            .collect();
        Ok(state.sorted_groups(state.groups.values().filter(|g| group_ids.contains(g.id.as_str()))))
    }

    async fn save_sync_record(&self, record: &SyncRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if state.sync_records.iter().any(|r| r.id == record.id) {
            return Err(GraphError::Conflict(record.id.clone()));
        }
        state.sync_records.push(record.clone());
        Ok(())
    }

    async fn get_last_sync_record(&self, provider: Option<&str>) -> Result<Option<SyncRecord>> {
        let state = self.state.read().await;
        Ok(state.sync_records_desc(provider).into_iter().next())
    }

    async fn list_sync_records(&self, provider: Option<&str>, limit: usize) -> Result<Vec<SyncRecord>> {
        let state = self.state.read().await;
        let mut records = state.sync_records_desc(provider);
        records.truncate(limit);
        Ok(records)
    }
}
