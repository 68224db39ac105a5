//! Audit log, grouping and sync-run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{Metadata, Tags};

/// Kind of change recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    NodeCreated,
    NodeUpdated,
    NodeDeleted,
    NodeDisappeared,
    EdgeCreated,
    EdgeUpdated,
    EdgeDeleted,
}

impl ChangeType {
    pub const ALL: [ChangeType; 7] = [
        ChangeType::NodeCreated,
        ChangeType::NodeUpdated,
        ChangeType::NodeDeleted,
        ChangeType::NodeDisappeared,
        ChangeType::EdgeCreated,
        ChangeType::EdgeUpdated,
        ChangeType::EdgeDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::NodeCreated => "node-created",
            ChangeType::NodeUpdated => "node-updated",
            ChangeType::NodeDeleted => "node-deleted",
            ChangeType::NodeDisappeared => "node-disappeared",
            ChangeType::EdgeCreated => "edge-created",
            ChangeType::EdgeUpdated => "edge-updated",
            ChangeType::EdgeDeleted => "edge-deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

/// Who or what initiated a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitiatorType {
    Human,
    Agent,
    System,
}

impl InitiatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitiatorType::Human => "human",
            InitiatorType::Agent => "agent",
            InitiatorType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" => Some(InitiatorType::Human),
            "agent" => Some(InitiatorType::Agent),
            "system" => Some(InitiatorType::System),
            _ => None,
        }
    }
}

/// An append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphChange {
    pub id: String,
    /// Node or edge id the change applies to
    pub target_id: String,
    pub change_type: ChangeType,
    pub field: Option<String>,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
    pub detected_at: DateTime<Utc>,
    /// Mechanism that noticed the change (e.g. "sync", "manual")
    pub detected_via: String,
    pub correlation_id: Option<String>,
    pub initiator: Option<String>,
    pub initiator_type: Option<InitiatorType>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl GraphChange {
    /// A change detected now with a fresh id.
    pub fn new(target_id: impl Into<String>, change_type: ChangeType, detected_via: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target_id: target_id.into(),
            change_type,
            field: None,
            previous_value: None,
            new_value: None,
            detected_at: Utc::now(),
            detected_via: detected_via.into(),
            correlation_id: None,
            initiator: None,
            initiator_type: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_field(
        mut self,
        field: impl Into<String>,
        previous_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        self.field = Some(field.into());
        self.previous_value = previous_value;
        self.new_value = new_value;
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>, initiator_type: InitiatorType) -> Self {
        self.initiator = Some(initiator.into());
        self.initiator_type = Some(initiator_type);
        self
    }

    pub fn detected_at(mut self, at: DateTime<Utc>) -> Self {
        self.detected_at = at;
        self
    }
}

/// Kind of logical grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupType {
    Application,
    CostCenter,
    Team,
    Environment,
    Custom,
}

impl GroupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupType::Application => "application",
            GroupType::CostCenter => "cost-center",
            GroupType::Team => "team",
            GroupType::Environment => "environment",
            GroupType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "application" => Some(GroupType::Application),
            "cost-center" => Some(GroupType::CostCenter),
            "team" => Some(GroupType::Team),
            "environment" => Some(GroupType::Environment),
            "custom" => Some(GroupType::Custom),
            _ => None,
        }
    }
}

/// A named logical grouping of nodes. Groups never own node lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphGroup {
    pub id: String,
    pub name: String,
    pub group_type: GroupType,
    pub description: Option<String>,
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GraphGroup {
    pub fn new(name: impl Into<String>, group_type: GroupType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            group_type,
            description: None,
            owner: None,
            tags: Tags::new(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Membership of a node in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphGroupMember {
    pub group_id: String,
    pub node_id: String,
    pub added_at: DateTime<Utc>,
}

/// A failure captured during discovery; never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryError {
    pub resource_type: String,
    pub region: Option<String>,
    pub message: String,
    pub code: Option<String>,
}

impl DiscoveryError {
    pub fn new(resource_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            region: None,
            message: message.into(),
            code: None,
        }
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Outcome of a discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Completed,
    /// Finished with per-unit errors
    Partial,
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Completed => "completed",
            SyncStatus::Partial => "partial",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(SyncStatus::Completed),
            "partial" => Some(SyncStatus::Partial),
            "failed" => Some(SyncStatus::Failed),
            "cancelled" => Some(SyncStatus::Cancelled),
            _ => None,
        }
    }
}

/// One record per discovery run. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: String,
    pub provider: String,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub nodes_discovered: u64,
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub nodes_disappeared: u64,
    pub edges_discovered: u64,
    pub edges_created: u64,
    pub edges_updated: u64,
    #[serde(default)]
    pub errors: Vec<DiscoveryError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_type_roundtrip() {
        for change_type in ChangeType::ALL {
            assert_eq!(ChangeType::parse(change_type.as_str()), Some(change_type));
        }
    }

    #[test]
    fn test_change_builder() {
        let change = GraphChange::new("n1", ChangeType::NodeUpdated, "sync")
            .with_field("status", Some("running".into()), Some("stopped".into()))
            .with_correlation("run-1")
            .with_initiator("infragraph-sync", InitiatorType::System);
        assert_eq!(change.field.as_deref(), Some("status"));
        assert_eq!(change.correlation_id.as_deref(), Some("run-1"));
        assert_eq!(change.initiator_type, Some(InitiatorType::System));
        assert!(!change.id.is_empty());
    }

    #[test]
    fn test_discovery_error_builder() {
        let err = DiscoveryError::new("compute", "throttled")
            .in_region("us-east-1")
            .with_code("429");
        assert_eq!(err.region.as_deref(), Some("us-east-1"));
        assert_eq!(err.code.as_deref(), Some("429"));
    }
}
