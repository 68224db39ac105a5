//! Infragraph Graph - the infrastructure knowledge graph.
//!
//! This crate holds everything that does not talk to a cloud provider:
//!
//! - **Schema**: typed nodes, edges and the closed enumerations they use
//! - **Path / Rules**: reading raw provider payloads and turning fields into edges
//! - **Storage**: the `GraphStorage` contract with in-memory and SQLite backends
//! - **Temporal**: immutable snapshots, history and diffs
//!
//! # Example
//!
//! ```ignore
//! use infragraph_graph::{CloudProvider, NodeInput, ResourceType, RuleEngine, RuleSource, DiscoveryMethod};
//! use infragraph_graph::storage::{GraphStorage, SqliteGraphStore};
//!
//! let store = SqliteGraphStore::new(pool);
//!
//! let node = NodeInput::new(CloudProvider::Aws, "123", "us-east-1", ResourceType::Compute, "i-1");
//! let source = RuleSource {
//!     node_id: &node.id,
//!     provider: node.provider,
//!     resource_type: node.resource_type,
//!     account: &node.account,
//!     region: &node.region,
//! };
//! let edges = RuleEngine::standard().extract(&source, &raw, DiscoveryMethod::ApiField);
//!
//! store.upsert_node(&node).await?;
//! store.upsert_edges(&edges).await?;
//! ```

pub mod error;
pub mod identity;
pub mod path;
pub mod query;
pub mod records;
pub mod rules;
pub mod schema;
pub mod storage;
pub mod temporal;

pub use error::{GraphError, Result};
pub use identity::{
    build_edge_id, build_node_id, native_id_from_reference, parse_node_id, placeholder_node, NodeIdParts,
    GLOBAL_REGION,
};
pub use query::{
    ChangeFilter, EdgeFilter, GraphStats, NodeFilter, Page, PageOptions, Subgraph, TraversalDirection,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MAX_TRAVERSAL_DEPTH,
};
pub use records::{
    ChangeType, DiscoveryError, GraphChange, GraphGroup, GraphGroupMember, GroupType, InitiatorType, SyncRecord,
    SyncStatus,
};
pub use rules::{EdgeCollector, RelationshipRule, RuleEngine, RuleSource, STANDARD_RULES};
pub use schema::{
    confidence, CloudProvider, DiscoveryMethod, EdgeInput, GraphEdge, GraphNode, Metadata, NodeInput, NodeStatus,
    RelationshipType, ResourceType, Tags,
};
pub use storage::{GraphStorage, InMemoryGraphStore, SqliteGraphStore};
pub use temporal::{
    GraphSnapshot, InMemorySnapshotStore, RetentionPolicy, SnapshotDiff, SnapshotFilter, SnapshotStore,
    SnapshotTrigger, SqliteSnapshotStore,
};
