//! Query, pagination and traversal types shared by every backend.
//!
//! Filters carry their own `matches` predicate so the in-memory backend and
//! the snapshot readers evaluate exactly what the SQL backend compiles into
//! a `WHERE` clause.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::records::{ChangeType, GraphChange, InitiatorType};
use crate::schema::{
    CloudProvider, DiscoveryMethod, GraphEdge, GraphNode, NodeStatus, RelationshipType, ResourceType,
    Tags,
};

/// Hard cap on traversal depth regardless of the requested depth.
pub const MAX_TRAVERSAL_DEPTH: usize = 10;

/// Page size used when the caller doesn't pick one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Largest page size a caller can request.
pub const MAX_PAGE_SIZE: usize = 1000;

const CURSOR_PREFIX: &str = "offset:";

/// Filter for node queries. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFilter {
    pub provider: Option<CloudProvider>,
    #[serde(default)]
    pub resource_types: Vec<ResourceType>,
    pub region: Option<String>,
    pub account: Option<String>,
    #[serde(default)]
    pub statuses: Vec<NodeStatus>,
    pub owner: Option<String>,
    /// Substring of the node name (case-sensitive)
    pub name_contains: Option<String>,
    pub min_cost: Option<f64>,
    pub max_cost: Option<f64>,
    /// Every pair must be present on the node
    #[serde(default)]
    pub tags: Tags,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider: CloudProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_types.push(resource_type);
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn status(mut self, status: NodeStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn name_contains(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    pub fn cost_between(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_cost = min;
        self.max_cost = max;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Reject tag keys that cannot be matched safely.
    pub fn validate(&self) -> Result<()> {
        for key in self.tags.keys() {
            validate_tag_key(key)?;
        }
        Ok(())
    }

    pub fn matches(&self, node: &GraphNode) -> bool {
        if self.provider.is_some_and(|p| p != node.provider) {
            return false;
        }
        if !self.resource_types.is_empty() && !self.resource_types.contains(&node.resource_type) {
            return false;
        }
        if self.region.as_ref().is_some_and(|r| r != &node.region) {
            return false;
        }
        if self.account.as_ref().is_some_and(|a| a != &node.account) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&node.status) {
            return false;
        }
        if self.owner.is_some() && self.owner != node.owner {
            return false;
        }
        if let Some(needle) = &self.name_contains {
            if !node.name.contains(needle.as_str()) {
                return false;
            }
        }
        if self.min_cost.is_some() || self.max_cost.is_some() {
            let Some(cost) = node.cost_monthly else {
                return false;
            };
            if self.min_cost.is_some_and(|min| cost < min) || self.max_cost.is_some_and(|max| cost > max) {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|(k, v)| node.tags.get(k).is_some_and(|actual| actual == v))
    }
}

/// Tag keys are embedded in JSON paths by the relational backend.
pub fn validate_tag_key(key: &str) -> Result<()> {
    if key.is_empty() || key.chars().any(|c| c == '"' || c == '\\' || c.is_control()) {
        return Err(GraphError::InvalidTagFilter(key.to_string()));
    }
    Ok(())
}

/// Sort order shared by every node listing: name, then id.
pub fn sort_nodes(nodes: &mut [GraphNode]) {
    nodes.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
}

/// Filter for edge queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeFilter {
    pub source_node_id: Option<String>,
    pub target_node_id: Option<String>,
    #[serde(default)]
    pub relationship_types: Vec<RelationshipType>,
    pub discovered_via: Option<DiscoveryMethod>,
    pub min_confidence: Option<f64>,
}

impl EdgeFilter {
    pub fn matches(&self, edge: &GraphEdge) -> bool {
        self.source_node_id.as_ref().map_or(true, |s| s == &edge.source_node_id)
            && self.target_node_id.as_ref().map_or(true, |t| t == &edge.target_node_id)
            && (self.relationship_types.is_empty()
                || self.relationship_types.contains(&edge.relationship_type))
            && self.discovered_via.map_or(true, |d| d == edge.discovered_via)
            && self.min_confidence.map_or(true, |min| edge.confidence >= min)
    }
}

/// Filter for change log reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub target_id: Option<String>,
    #[serde(default)]
    pub change_types: Vec<ChangeType>,
    pub detected_via: Option<String>,
    pub correlation_id: Option<String>,
    pub initiator: Option<String>,
    pub initiator_type: Option<InitiatorType>,
    /// Inclusive lower bound on `detected_at`
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `detected_at`
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ChangeFilter {
    pub fn matches(&self, change: &GraphChange) -> bool {
        self.target_id.as_ref().map_or(true, |t| t == &change.target_id)
            && (self.change_types.is_empty() || self.change_types.contains(&change.change_type))
            && self.detected_via.as_ref().map_or(true, |d| d == &change.detected_via)
            && (self.correlation_id.is_none() || self.correlation_id == change.correlation_id)
            && (self.initiator.is_none() || self.initiator == change.initiator)
            && (self.initiator_type.is_none() || self.initiator_type == change.initiator_type)
            && self.since.map_or(true, |s| change.detected_at >= s)
            && self.until.map_or(true, |u| change.detected_at < u)
    }
}

/// Which edges a traversal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraversalDirection {
    /// Edges where the node is the source
    Downstream,
    /// Edges where the node is the target
    Upstream,
    Both,
}

impl TraversalDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraversalDirection::Downstream => "downstream",
            TraversalDirection::Upstream => "upstream",
            TraversalDirection::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "downstream" => Some(TraversalDirection::Downstream),
            "upstream" => Some(TraversalDirection::Upstream),
            "both" => Some(TraversalDirection::Both),
            _ => None,
        }
    }

    /// Whether `edge` is incident to `node_id` in this direction.
    pub fn includes(&self, edge: &GraphEdge, node_id: &str) -> bool {
        match self {
            TraversalDirection::Downstream => edge.source_node_id == node_id,
            TraversalDirection::Upstream => edge.target_node_id == node_id,
            TraversalDirection::Both => edge.touches(node_id),
        }
    }
}

/// Nodes reached by a traversal and the edges among them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Caller options for paginated node queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageOptions {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

impl PageOptions {
    /// Effective page size: default when unset, clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    /// Offset encoded in the cursor, or 0 without one.
    pub fn offset(&self) -> Result<usize> {
        match &self.cursor {
            Some(cursor) => decode_cursor(cursor),
            None => Ok(0),
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub has_more: bool,
    /// Absent once the result set is exhausted
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Build a page from the items at `offset` of a `total_count`-sized set.
    pub fn from_window(items: Vec<T>, offset: usize, limit: usize, total_count: usize) -> Self {
        let has_more = offset.saturating_add(limit) < total_count;
        Self {
            items,
            total_count,
            has_more,
            next_cursor: has_more.then(|| encode_cursor(offset + limit)),
        }
    }
}

/// Encode an offset as an opaque cursor.
pub fn encode_cursor(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}{}", CURSOR_PREFIX, offset))
}

/// Decode a cursor produced by [`encode_cursor`].
pub fn decode_cursor(cursor: &str) -> Result<usize> {
    let invalid = || GraphError::InvalidCursor(cursor.to_string());
    let bytes = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    let digits = text.strip_prefix(CURSOR_PREFIX).ok_or_else(invalid)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    digits.parse::<usize>().map_err(|_| invalid())
}

/// Aggregate counts over the live graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: u64,
    pub total_edges: u64,
    pub nodes_by_provider: BTreeMap<String, u64>,
    pub nodes_by_resource_type: BTreeMap<String, u64>,
    pub edges_by_relationship_type: BTreeMap<String, u64>,
    pub total_cost_monthly: f64,
    pub total_changes: u64,
    pub total_groups: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub oldest_change_at: Option<DateTime<Utc>>,
    pub newest_change_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::NodeInput;

    fn node(name: &str) -> GraphNode {
        let input = NodeInput::new(CloudProvider::Aws, "1", "us-east-1", ResourceType::Compute, name)
            .with_name(name)
            .with_tag("env", "prod")
            .with_tag("team", "core")
            .with_cost(42.0);
        GraphNode::from_input(&input, None, Utc::now())
    }

    #[test]
    fn test_cursor_roundtrip() {
        for offset in [0, 1, 100, 999_999] {
            assert_eq!(decode_cursor(&encode_cursor(offset)).unwrap(), offset);
        }
    }

    #[test]
    fn test_cursor_rejects_tampering() {
        assert!(matches!(decode_cursor("!!!"), Err(GraphError::InvalidCursor(_))));
        let not_offset = URL_SAFE_NO_PAD.encode("limit:5");
        assert!(decode_cursor(&not_offset).is_err());
        let negative = URL_SAFE_NO_PAD.encode("offset:-5");
        assert!(decode_cursor(&negative).is_err());
        let empty = URL_SAFE_NO_PAD.encode("offset:");
        assert!(decode_cursor(&empty).is_err());
    }

    #[test]
    fn test_page_window_has_more() {
        let page: Page<u8> = Page::from_window(vec![], 0, 10, 25);
        assert!(page.has_more);
        assert_eq!(decode_cursor(page.next_cursor.as_deref().unwrap()).unwrap(), 10);

        let page: Page<u8> = Page::from_window(vec![], 20, 10, 25);
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());

        let page: Page<u8> = Page::from_window(vec![], 15, 10, 25);
        assert!(!page.has_more);
    }

    #[test]
    fn test_effective_limit() {
        assert_eq!(PageOptions::default().effective_limit(), DEFAULT_PAGE_SIZE);
        let opts = PageOptions {
            limit: Some(5000),
            cursor: None,
        };
        assert_eq!(opts.effective_limit(), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_node_filter_tag_subset() {
        let n = node("web");
        assert!(NodeFilter::new().tag("env", "prod").matches(&n));
        assert!(NodeFilter::new().tag("env", "prod").tag("team", "core").matches(&n));
        assert!(!NodeFilter::new().tag("env", "dev").matches(&n));
        assert!(!NodeFilter::new().tag("owner", "x").matches(&n));
    }

    #[test]
    fn test_node_filter_cost_and_name() {
        let n = node("web-frontend");
        assert!(NodeFilter::new().name_contains("front").matches(&n));
        assert!(!NodeFilter::new().name_contains("Front").matches(&n));
        assert!(NodeFilter::new().cost_between(Some(10.0), Some(50.0)).matches(&n));
        assert!(!NodeFilter::new().cost_between(Some(50.0), None).matches(&n));
    }

    #[test]
    fn test_tag_key_validation() {
        assert!(NodeFilter::new().tag("env", "x").validate().is_ok());
        assert!(matches!(
            NodeFilter::new().tag("bad\"key", "x").validate(),
            Err(GraphError::InvalidTagFilter(_))
        ));
        assert!(NodeFilter::new().tag("", "x").validate().is_err());
    }
}
