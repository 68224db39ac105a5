//! Graph schema definitions for the infrastructure graph.
//!
//! This module defines the core types for the resource graph:
//! - `CloudProvider`: Sources that discover resources
//! - `ResourceType`: Closed set of resource kinds
//! - `NodeStatus`: Lifecycle state of a discovered resource
//! - `RelationshipType`: Typed relationships, each with an explicit inverse
//! - `NodeInput` / `EdgeInput`: What adapters produce
//! - `GraphNode` / `GraphEdge`: What storage returns

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{build_edge_id, build_node_id};

/// Open-ended provider-specific facts attached to nodes and edges.
///
/// `serde_json::Map` keeps keys sorted, so serializing the same content
/// always produces the same string.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Resource tags (string to string).
pub type Tags = BTreeMap<String, String>;

/// Provenance-weighted confidence scores for edges.
pub mod confidence {
    /// Explicitly declared dependency (e.g. `depends_on` in IaC).
    pub const DECLARED: f64 = 1.0;
    /// Derived from a field of a provider API response.
    pub const API_FIELD: f64 = 0.95;
    /// Inferred from an IaC attribute value.
    pub const IAC_INFERRED: f64 = 0.9;
    /// Inferred across state files or adapters.
    pub const CROSS_STATE: f64 = 0.85;
}

/// Source that discovered a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
    Kubernetes,
    Terraform,
}

impl CloudProvider {
    pub const ALL: [CloudProvider; 5] = [
        CloudProvider::Aws,
        CloudProvider::Azure,
        CloudProvider::Gcp,
        CloudProvider::Kubernetes,
        CloudProvider::Terraform,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Azure => "azure",
            CloudProvider::Gcp => "gcp",
            CloudProvider::Kubernetes => "kubernetes",
            CloudProvider::Terraform => "terraform",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aws" => Some(CloudProvider::Aws),
            "azure" => Some(CloudProvider::Azure),
            "gcp" => Some(CloudProvider::Gcp),
            "kubernetes" => Some(CloudProvider::Kubernetes),
            "terraform" => Some(CloudProvider::Terraform),
            _ => None,
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of infrastructure resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    // Compute
    Compute,
    Container,
    ServerlessFunction,
    Cluster,
    Namespace,

    // Data
    Database,
    Cache,
    /// Block storage volumes and disks
    Storage,
    /// Buckets and blob containers
    ObjectStorage,

    // Messaging
    Queue,
    Topic,
    Stream,

    // Network
    Vpc,
    Subnet,
    SecurityGroup,
    NetworkInterface,
    LoadBalancer,
    RouteTable,
    NatGateway,
    InternetGateway,
    DnsZone,
    Cdn,
    ApiGateway,

    // Identity and secrets
    IamRole,
    IamPolicy,
    IamUser,
    Secret,
    EncryptionKey,
    Certificate,

    /// Anything the closed set doesn't cover yet
    Custom,
}

impl ResourceType {
    pub const ALL: [ResourceType; 30] = [
        ResourceType::Compute,
        ResourceType::Container,
        ResourceType::ServerlessFunction,
        ResourceType::Cluster,
        ResourceType::Namespace,
        ResourceType::Database,
        ResourceType::Cache,
        ResourceType::Storage,
        ResourceType::ObjectStorage,
        ResourceType::Queue,
        ResourceType::Topic,
        ResourceType::Stream,
        ResourceType::Vpc,
        ResourceType::Subnet,
        ResourceType::SecurityGroup,
        ResourceType::NetworkInterface,
        ResourceType::LoadBalancer,
        ResourceType::RouteTable,
        ResourceType::NatGateway,
        ResourceType::InternetGateway,
        ResourceType::DnsZone,
        ResourceType::Cdn,
        ResourceType::ApiGateway,
        ResourceType::IamRole,
        ResourceType::IamPolicy,
        ResourceType::IamUser,
        ResourceType::Secret,
        ResourceType::EncryptionKey,
        ResourceType::Certificate,
        ResourceType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Compute => "compute",
            ResourceType::Container => "container",
            ResourceType::ServerlessFunction => "serverless-function",
            ResourceType::Cluster => "cluster",
            ResourceType::Namespace => "namespace",
            ResourceType::Database => "database",
            ResourceType::Cache => "cache",
            ResourceType::Storage => "storage",
            ResourceType::ObjectStorage => "object-storage",
            ResourceType::Queue => "queue",
            ResourceType::Topic => "topic",
            ResourceType::Stream => "stream",
            ResourceType::Vpc => "vpc",
            ResourceType::Subnet => "subnet",
            ResourceType::SecurityGroup => "security-group",
            ResourceType::NetworkInterface => "network-interface",
            ResourceType::LoadBalancer => "load-balancer",
            ResourceType::RouteTable => "route-table",
            ResourceType::NatGateway => "nat-gateway",
            ResourceType::InternetGateway => "internet-gateway",
            ResourceType::DnsZone => "dns-zone",
            ResourceType::Cdn => "cdn",
            ResourceType::ApiGateway => "api-gateway",
            ResourceType::IamRole => "iam-role",
            ResourceType::IamPolicy => "iam-policy",
            ResourceType::IamUser => "iam-user",
            ResourceType::Secret => "secret",
            ResourceType::EncryptionKey => "encryption-key",
            ResourceType::Certificate => "certificate",
            ResourceType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    Running,
    Stopped,
    Pending,
    Creating,
    Deleting,
    Deleted,
    /// Not observed by the most recent sync of its provider
    Disappeared,
    Error,
    Unknown,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 9] = [
        NodeStatus::Running,
        NodeStatus::Stopped,
        NodeStatus::Pending,
        NodeStatus::Creating,
        NodeStatus::Deleting,
        NodeStatus::Deleted,
        NodeStatus::Disappeared,
        NodeStatus::Error,
        NodeStatus::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Running => "running",
            NodeStatus::Stopped => "stopped",
            NodeStatus::Pending => "pending",
            NodeStatus::Creating => "creating",
            NodeStatus::Deleting => "deleting",
            NodeStatus::Deleted => "deleted",
            NodeStatus::Disappeared => "disappeared",
            NodeStatus::Error => "error",
            NodeStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|st| st.as_str() == s)
    }

    /// Map a raw provider lifecycle string onto the closed status set.
    pub fn from_provider_state(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "running" | "available" | "active" | "in-use" | "ready" | "succeeded" | "healthy"
            | "enabled" | "ok" | "bound" => NodeStatus::Running,
            "stopped" | "stopping" | "inactive" | "disabled" | "deallocated" | "suspended" => {
                NodeStatus::Stopped
            }
            "pending" | "starting" | "provisioning" | "updating" | "modifying" | "rebooting" => {
                NodeStatus::Pending
            }
            "creating" => NodeStatus::Creating,
            "deleting" | "shutting-down" | "terminating" => NodeStatus::Deleting,
            "deleted" | "terminated" => NodeStatus::Deleted,
            "failed" | "error" | "unhealthy" | "impaired" => NodeStatus::Error,
            _ => NodeStatus::Unknown,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types of relationships between resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipType {
    // Placement
    RunsIn,
    Contains,

    // Security
    SecuredBy,
    Secures,
    EncryptsWith,
    Encrypts,

    // Attachment and membership
    AttachedTo,
    MemberOf,
    HasMember,

    // Traffic
    RoutesTo,
    ReceivesFrom,

    // Messaging
    PublishesTo,
    SubscribesTo,
    Triggers,
    TriggeredBy,

    // Dependencies
    DependsOn,
    DependedOnBy,
    Uses,
    UsedBy,
    BackedBy,
    Backs,

    // Symmetric
    Replicates,
    PeersWith,
    ConnectedTo,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 24] = [
        RelationshipType::RunsIn,
        RelationshipType::Contains,
        RelationshipType::SecuredBy,
        RelationshipType::Secures,
        RelationshipType::EncryptsWith,
        RelationshipType::Encrypts,
        RelationshipType::AttachedTo,
        RelationshipType::MemberOf,
        RelationshipType::HasMember,
        RelationshipType::RoutesTo,
        RelationshipType::ReceivesFrom,
        RelationshipType::PublishesTo,
        RelationshipType::SubscribesTo,
        RelationshipType::Triggers,
        RelationshipType::TriggeredBy,
        RelationshipType::DependsOn,
        RelationshipType::DependedOnBy,
        RelationshipType::Uses,
        RelationshipType::UsedBy,
        RelationshipType::BackedBy,
        RelationshipType::Backs,
        RelationshipType::Replicates,
        RelationshipType::PeersWith,
        RelationshipType::ConnectedTo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::RunsIn => "runs-in",
            RelationshipType::Contains => "contains",
            RelationshipType::SecuredBy => "secured-by",
            RelationshipType::Secures => "secures",
            RelationshipType::EncryptsWith => "encrypts-with",
            RelationshipType::Encrypts => "encrypts",
            RelationshipType::AttachedTo => "attached-to",
            RelationshipType::MemberOf => "member-of",
            RelationshipType::HasMember => "has-member",
            RelationshipType::RoutesTo => "routes-to",
            RelationshipType::ReceivesFrom => "receives-from",
            RelationshipType::PublishesTo => "publishes-to",
            RelationshipType::SubscribesTo => "subscribes-to",
            RelationshipType::Triggers => "triggers",
            RelationshipType::TriggeredBy => "triggered-by",
            RelationshipType::DependsOn => "depends-on",
            RelationshipType::DependedOnBy => "depended-on-by",
            RelationshipType::Uses => "uses",
            RelationshipType::UsedBy => "used-by",
            RelationshipType::BackedBy => "backed-by",
            RelationshipType::Backs => "backs",
            RelationshipType::Replicates => "replicates",
            RelationshipType::PeersWith => "peers-with",
            RelationshipType::ConnectedTo => "connected-to",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.as_str() == s)
    }

    /// The relationship seen from the target's side.
    ///
    /// Exhaustive on purpose: a new variant does not compile until its
    /// inverse is chosen.
    pub fn inverse(&self) -> Self {
        match self {
            RelationshipType::RunsIn => RelationshipType::Contains,
            RelationshipType::Contains => RelationshipType::RunsIn,
            RelationshipType::SecuredBy => RelationshipType::Secures,
            RelationshipType::Secures => RelationshipType::SecuredBy,
            RelationshipType::EncryptsWith => RelationshipType::Encrypts,
            RelationshipType::Encrypts => RelationshipType::EncryptsWith,
            RelationshipType::AttachedTo => RelationshipType::AttachedTo,
            RelationshipType::MemberOf => RelationshipType::HasMember,
            RelationshipType::HasMember => RelationshipType::MemberOf,
            RelationshipType::RoutesTo => RelationshipType::ReceivesFrom,
            RelationshipType::ReceivesFrom => RelationshipType::RoutesTo,
            RelationshipType::PublishesTo => RelationshipType::SubscribesTo,
            RelationshipType::SubscribesTo => RelationshipType::PublishesTo,
            RelationshipType::Triggers => RelationshipType::TriggeredBy,
            RelationshipType::TriggeredBy => RelationshipType::Triggers,
            RelationshipType::DependsOn => RelationshipType::DependedOnBy,
            RelationshipType::DependedOnBy => RelationshipType::DependsOn,
            RelationshipType::Uses => RelationshipType::UsedBy,
            RelationshipType::UsedBy => RelationshipType::Uses,
            RelationshipType::BackedBy => RelationshipType::Backs,
            RelationshipType::Backs => RelationshipType::BackedBy,
            RelationshipType::Replicates => RelationshipType::Replicates,
            RelationshipType::PeersWith => RelationshipType::PeersWith,
            RelationshipType::ConnectedTo => RelationshipType::ConnectedTo,
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an edge was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMethod {
    ApiField,
    IacParse,
    ConfigScan,
}

impl DiscoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryMethod::ApiField => "api-field",
            DiscoveryMethod::IacParse => "iac-parse",
            DiscoveryMethod::ConfigScan => "config-scan",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "api-field" => Some(DiscoveryMethod::ApiField),
            "iac-parse" => Some(DiscoveryMethod::IacParse),
            "config-scan" => Some(DiscoveryMethod::ConfigScan),
            _ => None,
        }
    }

    /// Confidence assigned to field-derived edges of this provenance.
    pub fn default_confidence(&self) -> f64 {
        match self {
            DiscoveryMethod::ApiField => confidence::API_FIELD,
            DiscoveryMethod::IacParse | DiscoveryMethod::ConfigScan => confidence::IAC_INFERRED,
        }
    }
}

/// A node as produced by a discovery adapter.
///
/// Storage fills in `discovered_at`, `updated_at` and `last_seen_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInput {
    pub id: String,
    pub provider: CloudProvider,
    pub resource_type: ResourceType,
    pub native_id: String,
    pub name: String,
    pub region: String,
    pub account: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub metadata: Metadata,
    pub cost_monthly: Option<f64>,
    pub owner: Option<String>,
    /// Provider-reported creation time
    pub created_at: Option<DateTime<Utc>>,
}

impl NodeInput {
    /// Create a node input; the id is derived from the identity tuple.
    pub fn new(
        provider: CloudProvider,
        account: impl Into<String>,
        region: impl Into<String>,
        resource_type: ResourceType,
        native_id: impl Into<String>,
    ) -> Self {
        let account = account.into();
        let region = region.into();
        let native_id = native_id.into();
        Self {
            id: build_node_id(provider, &account, &region, resource_type, &native_id),
            provider,
            resource_type,
            name: native_id.clone(),
            native_id,
            region,
            account,
            status: NodeStatus::Unknown,
            tags: Tags::new(),
            metadata: Metadata::new(),
            cost_monthly: None,
            owner: None,
            created_at: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_cost(mut self, cost_monthly: f64) -> Self {
        self.cost_monthly = Some(cost_monthly);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// A stored node in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub provider: CloudProvider,
    pub resource_type: ResourceType,
    pub native_id: String,
    pub name: String,
    pub region: String,
    pub account: String,
    pub status: NodeStatus,
    pub tags: Tags,
    pub metadata: Metadata,
    pub cost_monthly: Option<f64>,
    pub owner: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl GraphNode {
    /// Materialize an input observed at `now`, keeping `discovered_at` from
    /// an earlier write when there was one.
    pub fn from_input(input: &NodeInput, discovered_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Self {
            id: input.id.clone(),
            provider: input.provider,
            resource_type: input.resource_type,
            native_id: input.native_id.clone(),
            name: input.name.clone(),
            region: input.region.clone(),
            account: input.account.clone(),
            status: input.status,
            tags: input.tags.clone(),
            metadata: input.metadata.clone(),
            cost_monthly: input.cost_monthly,
            owner: input.owner.clone(),
            discovered_at: discovered_at.unwrap_or(now),
            created_at: input.created_at,
            updated_at: now,
            last_seen_at: now,
        }
    }

    /// Whether the node was synthesized for an unresolved cross-reference.
    pub fn is_placeholder(&self) -> bool {
        self.metadata
            .get("placeholder")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// An edge as produced by a discovery adapter or the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeInput {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    pub discovered_via: DiscoveryMethod,
    #[serde(default)]
    pub metadata: Metadata,
}

impl EdgeInput {
    /// Create an edge input with the provenance's default confidence.
    pub fn new(
        source_node_id: impl Into<String>,
        target_node_id: impl Into<String>,
        relationship_type: RelationshipType,
        discovered_via: DiscoveryMethod,
    ) -> Self {
        let source_node_id = source_node_id.into();
        let target_node_id = target_node_id.into();
        Self {
            id: build_edge_id(&source_node_id, relationship_type, &target_node_id),
            source_node_id,
            target_node_id,
            relationship_type,
            confidence: discovered_via.default_confidence(),
            discovered_via,
            metadata: Metadata::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A stored edge in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    pub discovered_via: DiscoveryMethod,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl GraphEdge {
    /// Materialize an input observed at `now`, keeping `created_at` from an
    /// earlier write when there was one.
    pub fn from_input(input: &EdgeInput, created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Self {
            id: input.id.clone(),
            source_node_id: input.source_node_id.clone(),
            target_node_id: input.target_node_id.clone(),
            relationship_type: input.relationship_type,
            confidence: input.confidence,
            discovered_via: input.discovered_via,
            metadata: input.metadata.clone(),
            created_at: created_at.unwrap_or(now),
            last_seen_at: now,
        }
    }

    /// Whether `node_id` is either endpoint of this edge.
    pub fn touches(&self, node_id: &str) -> bool {
        self.source_node_id == node_id || self.target_node_id == node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_roundtrip() {
        for resource_type in ResourceType::ALL {
            let parsed = ResourceType::parse(resource_type.as_str()).unwrap();
            assert_eq!(resource_type, parsed);
        }
        assert_eq!(ResourceType::parse("mainframe"), None);
    }

    #[test]
    fn test_relationship_inverse_is_involution() {
        for relationship in RelationshipType::ALL {
            assert_eq!(relationship.inverse().inverse(), relationship);
            assert_eq!(RelationshipType::parse(relationship.as_str()), Some(relationship));
        }
        assert_eq!(RelationshipType::Replicates.inverse(), RelationshipType::Replicates);
        assert_eq!(RelationshipType::Secures.inverse(), RelationshipType::SecuredBy);
        assert_eq!(RelationshipType::AttachedTo.inverse(), RelationshipType::AttachedTo);
    }

    #[test]
    fn test_serde_matches_as_str() {
        let json = serde_json::to_string(&RelationshipType::DependedOnBy).unwrap();
        assert_eq!(json, "\"depended-on-by\"");
        let json = serde_json::to_string(&ResourceType::ServerlessFunction).unwrap();
        assert_eq!(json, "\"serverless-function\"");
    }

    #[test]
    fn test_provider_state_normalization() {
        assert_eq!(NodeStatus::from_provider_state("available"), NodeStatus::Running);
        assert_eq!(NodeStatus::from_provider_state("STOPPED"), NodeStatus::Stopped);
        assert_eq!(NodeStatus::from_provider_state("shutting-down"), NodeStatus::Deleting);
        assert_eq!(NodeStatus::from_provider_state("terminated"), NodeStatus::Deleted);
        assert_eq!(NodeStatus::from_provider_state("in_use"), NodeStatus::Running);
        assert_eq!(NodeStatus::from_provider_state("weird"), NodeStatus::Unknown);
    }

    #[test]
    fn test_node_input_builds_identity() {
        let node = NodeInput::new(CloudProvider::Aws, "123", "us-east-1", ResourceType::Compute, "i-1")
            .with_name("web")
            .with_tag("env", "prod");
        assert_eq!(node.id, "aws:123:us-east-1:compute:i-1");
        assert_eq!(node.name, "web");
        assert_eq!(node.tags.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_edge_input_confidence_by_provenance() {
        let edge = EdgeInput::new("a", "b", RelationshipType::DependsOn, DiscoveryMethod::ApiField);
        assert_eq!(edge.id, "a--depends-on--b");
        assert_eq!(edge.confidence, confidence::API_FIELD);

        let edge = EdgeInput::new("a", "b", RelationshipType::DependsOn, DiscoveryMethod::IacParse)
            .with_confidence(confidence::DECLARED);
        assert_eq!(edge.confidence, 1.0);
    }
}
