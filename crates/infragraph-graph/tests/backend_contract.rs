//! Scenarios every storage and snapshot backend must pass identically.

use std::time::Duration;

use chrono::Utc;
use infragraph_graph::{
    ChangeFilter, ChangeType, CloudProvider, DiscoveryMethod, EdgeFilter, EdgeInput,
    GraphChange, GraphError, GraphGroup, GraphStorage, GroupType, InMemoryGraphStore, InMemorySnapshotStore,
    InitiatorType, NodeFilter, NodeInput, NodeStatus, PageOptions, RelationshipType, ResourceType, RetentionPolicy,
    SnapshotStore, SnapshotTrigger, SqliteGraphStore, SqliteSnapshotStore, SyncRecord, SyncStatus,
    TraversalDirection,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

async fn sqlite_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    SqliteGraphStore::init_schema(&pool).await.unwrap();
    SqliteSnapshotStore::init_schema(&pool).await.unwrap();
    pool
}

fn node(native_id: &str) -> NodeInput {
    NodeInput::new(CloudProvider::Aws, "123", "us-east-1", ResourceType::Compute, native_id)
}

fn edge(source: &NodeInput, target: &NodeInput, relationship: RelationshipType) -> EdgeInput {
    EdgeInput::new(&source.id, &target.id, relationship, DiscoveryMethod::ApiField)
}

async fn pause() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

/// Generate one test per storage backend for a scenario.
macro_rules! storage_contract {
    ($name:ident) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn memory() {
                super::$name(&InMemoryGraphStore::new()).await;
            }

            #[tokio::test]
            async fn sqlite() {
                super::$name(&SqliteGraphStore::new(sqlite_pool().await)).await;
            }
        }
    };
}

/// Generate one test per snapshot backend for a scenario.
macro_rules! snapshot_contract {
    ($name:ident) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn memory() {
                super::$name(&InMemoryGraphStore::new(), &InMemorySnapshotStore::new()).await;
            }

            #[tokio::test]
            async fn sqlite() {
                let pool = sqlite_pool().await;
                super::$name(&SqliteGraphStore::new(pool.clone()), &SqliteSnapshotStore::new(pool)).await;
            }
        }
    };
}

async fn idempotent_upsert(store: &dyn GraphStorage) {
    let first = store.upsert_node(&node("i-1").with_name("web")).await.unwrap();
    pause().await;
    let second = store
        .upsert_node(&node("i-1").with_name("web-v2").with_status(NodeStatus::Running))
        .await
        .unwrap();

    let all = store.query_nodes(&NodeFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    let stored = &all[0];
    assert_eq!(stored.discovered_at, first.discovered_at);
    assert_eq!(stored.name, "web-v2");
    assert_eq!(stored.status, NodeStatus::Running);
    assert_eq!(stored.last_seen_at, second.last_seen_at);
    assert!(stored.updated_at > first.updated_at);
}
storage_contract!(idempotent_upsert);

async fn point_lookups_return_none(store: &dyn GraphStorage) {
    assert!(store.get_node("aws:1:r:compute:missing").await.unwrap().is_none());
    assert!(store.get_edge("a--uses--b").await.unwrap().is_none());
    assert!(store.get_group("nope").await.unwrap().is_none());
    assert!(store.get_last_sync_record(None).await.unwrap().is_none());

    store.upsert_node(&node("i-7")).await.unwrap();
    let found = store
        .get_node_by_native_id(CloudProvider::Aws, "i-7")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, node("i-7").id);
    assert!(store
        .get_node_by_native_id(CloudProvider::Gcp, "i-7")
        .await
        .unwrap()
        .is_none());
}
storage_contract!(point_lookups_return_none);

async fn cascade_delete(store: &dyn GraphStorage) {
    let (a, b, c) = (node("a"), node("b"), node("c"));
    store.upsert_nodes(&[a.clone(), b.clone(), c.clone()]).await.unwrap();
    store
        .upsert_edges(&[
            edge(&a, &b, RelationshipType::DependsOn),
            edge(&c, &a, RelationshipType::Uses),
            edge(&b, &c, RelationshipType::RoutesTo),
        ])
        .await
        .unwrap();
    let group = GraphGroup::new("payments", GroupType::Application);
    store.upsert_group(&group).await.unwrap();
    store.add_group_member(&group.id, &a.id).await.unwrap();
    store.add_group_member(&group.id, &b.id).await.unwrap();

    assert!(store.delete_node(&a.id).await.unwrap());

    let remaining = store.query_edges(&EdgeFilter::default()).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining.iter().all(|e| !e.touches(&a.id)));
    let members = store.get_group_members(&group.id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].node_id, b.id);
    assert!(store.get_node_groups(&a.id).await.unwrap().is_empty());
    assert!(store.get_group(&group.id).await.unwrap().is_some());
}
storage_contract!(cascade_delete);

async fn disappearance_scoping(store: &dyn GraphStorage) {
    let stale = node("stale");
    let other_provider = NodeInput::new(CloudProvider::Gcp, "p", "us-central1", ResourceType::Compute, "vm");
    store.upsert_nodes(&[stale.clone(), other_provider.clone()]).await.unwrap();
    pause().await;
    let cutoff = Utc::now();
    pause().await;
    let fresh = node("fresh");
    store.upsert_node(&fresh).await.unwrap();

    let marked = store
        .mark_nodes_disappeared(cutoff, Some(CloudProvider::Aws), None)
        .await
        .unwrap();
    assert_eq!(marked, vec![stale.id.clone()]);

    let stale_now = store.get_node(&stale.id).await.unwrap().unwrap();
    assert_eq!(stale_now.status, NodeStatus::Disappeared);
    let gcp = store.get_node(&other_provider.id).await.unwrap().unwrap();
    assert_ne!(gcp.status, NodeStatus::Disappeared);

    // Already-disappeared nodes are not reported twice
    let again = store.mark_nodes_disappeared(cutoff, None, None).await.unwrap();
    assert_eq!(again, vec![other_provider.id.clone()]);
}
storage_contract!(disappearance_scoping);

async fn disappearance_by_account(store: &dyn GraphStorage) {
    let prod = NodeInput::new(CloudProvider::Aws, "111", "us-east-1", ResourceType::Compute, "i-prod");
    let staging = NodeInput::new(CloudProvider::Aws, "222", "us-east-1", ResourceType::Compute, "i-staging");
    store.upsert_nodes(&[prod.clone(), staging.clone()]).await.unwrap();
    pause().await;
    let cutoff = Utc::now();

    let marked = store
        .mark_nodes_disappeared(cutoff, Some(CloudProvider::Aws), Some("222"))
        .await
        .unwrap();
    assert_eq!(marked, vec![staging.id.clone()]);
    let prod_now = store.get_node(&prod.id).await.unwrap().unwrap();
    assert_ne!(prod_now.status, NodeStatus::Disappeared);
}
storage_contract!(disappearance_by_account);

async fn disappearance_cutoff_precision(store: &dyn GraphStorage) {
    let stored = store.upsert_node(&node("i-1")).await.unwrap();
    // Stored timestamps carry microseconds; a cutoff a few nanoseconds later
    // falls in the same microsecond and must not flag the node.
    let cutoff = stored.last_seen_at + chrono::Duration::nanoseconds(500);

    let marked = store.mark_nodes_disappeared(cutoff, None, None).await.unwrap();
    assert!(marked.is_empty());
    let later = stored.last_seen_at + chrono::Duration::microseconds(1);
    assert_eq!(store.mark_nodes_disappeared(later, None, None).await.unwrap(), vec![stored.id]);
}
storage_contract!(disappearance_cutoff_precision);

async fn traversal_is_bounded(store: &dyn GraphStorage) {
    let chain: Vec<NodeInput> = (0..15).map(|i| node(&format!("n{i:02}"))).collect();
    store.upsert_nodes(&chain).await.unwrap();
    let links: Vec<EdgeInput> = chain
        .windows(2)
        .map(|pair| edge(&pair[0], &pair[1], RelationshipType::RoutesTo))
        .collect();
    store.upsert_edges(&links).await.unwrap();

    let sub = store
        .get_neighbors(&chain[0].id, 999, TraversalDirection::Downstream, None)
        .await
        .unwrap();
    assert_eq!(sub.nodes.len(), 11);
    assert_eq!(sub.edges.len(), 10);

    let two = store
        .get_neighbors(&chain[5].id, 2, TraversalDirection::Both, None)
        .await
        .unwrap();
    let ids: Vec<&str> = two.nodes.iter().map(|n| n.native_id.as_str()).collect();
    assert_eq!(ids, vec!["n03", "n04", "n05", "n06", "n07"]);

    let upstream = store
        .get_neighbors(&chain[0].id, 5, TraversalDirection::Upstream, None)
        .await
        .unwrap();
    assert_eq!(upstream.nodes.len(), 1);
    assert!(upstream.edges.is_empty());
}
storage_contract!(traversal_is_bounded);

async fn traversal_collects_cross_links(store: &dyn GraphStorage) {
    let (a, b, c) = (node("a"), node("b"), node("c"));
    store.upsert_nodes(&[a.clone(), b.clone(), c.clone()]).await.unwrap();
    store
        .upsert_edges(&[
            edge(&a, &b, RelationshipType::DependsOn),
            edge(&a, &c, RelationshipType::DependsOn),
            edge(&b, &c, RelationshipType::PeersWith),
            edge(&c, &a, RelationshipType::Uses),
        ])
        .await
        .unwrap();

    let sub = store
        .get_neighbors(&a.id, 1, TraversalDirection::Downstream, None)
        .await
        .unwrap();
    assert_eq!(sub.nodes.len(), 3);
    assert_eq!(sub.edges.len(), 4);

    let only_depends = store
        .get_neighbors(&a.id, 3, TraversalDirection::Downstream, Some(&[RelationshipType::DependsOn]))
        .await
        .unwrap();
    assert_eq!(only_depends.edges.len(), 2);
}
storage_contract!(traversal_collects_cross_links);

async fn traversal_on_dense_graph(store: &dyn GraphStorage) {
    // Complete digraph: every ordered pair linked, so every node sits on
    // many cycles and the number of simple paths explodes with depth.
    let nodes: Vec<NodeInput> = (0..14).map(|i| node(&format!("k{i:02}"))).collect();
    store.upsert_nodes(&nodes).await.unwrap();
    let links: Vec<EdgeInput> = nodes
        .iter()
        .flat_map(|a| nodes.iter().filter(move |b| b.id != a.id).map(move |b| edge(a, b, RelationshipType::DependsOn)))
        .collect();
    store.upsert_edges(&links).await.unwrap();

    for direction in [TraversalDirection::Downstream, TraversalDirection::Both] {
        let sub = tokio::time::timeout(
            Duration::from_secs(10),
            store.get_neighbors(&nodes[0].id, 999, direction, None),
        )
        .await
        .expect("traversal finished in time")
        .unwrap();
        assert_eq!(sub.nodes.len(), 14);
        assert_eq!(sub.edges.len(), 14 * 13);
    }
}
storage_contract!(traversal_on_dense_graph);

async fn traversal_reaches_wide_fan_out(store: &dyn GraphStorage) {
    let hub = node("hub");
    let leaves: Vec<NodeInput> = (0..17_000).map(|i| node(&format!("leaf-{i:05}"))).collect();
    store.upsert_node(&hub).await.unwrap();
    store.upsert_nodes(&leaves).await.unwrap();
    let spokes: Vec<EdgeInput> = leaves.iter().map(|leaf| edge(&hub, leaf, RelationshipType::RoutesTo)).collect();
    store.upsert_edges(&spokes).await.unwrap();

    let sub = store
        .get_neighbors(&hub.id, 1, TraversalDirection::Downstream, None)
        .await
        .unwrap();
    assert_eq!(sub.nodes.len(), 17_001);
    assert_eq!(sub.edges.len(), 17_000);
}
storage_contract!(traversal_reaches_wide_fan_out);

async fn edges_for_node_direction(store: &dyn GraphStorage) {
    let (a, b, c) = (node("a"), node("b"), node("c"));
    store
        .upsert_edges(&[
            edge(&a, &b, RelationshipType::DependsOn),
            edge(&c, &a, RelationshipType::Uses),
            edge(&a, &c, RelationshipType::SecuredBy),
        ])
        .await
        .unwrap();

    let down = store
        .get_edges_for_node(&a.id, TraversalDirection::Downstream, None)
        .await
        .unwrap();
    assert_eq!(down.len(), 2);
    let up = store
        .get_edges_for_node(&a.id, TraversalDirection::Upstream, None)
        .await
        .unwrap();
    assert_eq!(up.len(), 1);
    let both = store
        .get_edges_for_node(&a.id, TraversalDirection::Both, Some(RelationshipType::SecuredBy))
        .await
        .unwrap();
    assert_eq!(both.len(), 1);

    // Same ordered pair, different relationship: distinct edges
    store.upsert_edge(&edge(&a, &b, RelationshipType::Uses)).await.unwrap();
    let pair = store
        .query_edges(&EdgeFilter {
            source_node_id: Some(a.id.clone()),
            target_node_id: Some(b.id.clone()),
            ..EdgeFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(pair.len(), 2);
}
storage_contract!(edges_for_node_direction);

async fn node_filters(store: &dyn GraphStorage) {
    store
        .upsert_nodes(&[
            node("i-1")
                .with_name("api-blue")
                .with_status(NodeStatus::Running)
                .with_tag("env", "prod")
                .with_tag("team", "core")
                .with_cost(120.0)
                .with_owner("alice"),
            node("i-2")
                .with_name("api-green")
                .with_status(NodeStatus::Stopped)
                .with_tag("env", "prod")
                .with_cost(80.0),
            node("i-3")
                .with_name("batch")
                .with_status(NodeStatus::Running)
                .with_tag("env", "dev"),
            NodeInput::new(CloudProvider::Aws, "123", "eu-west-1", ResourceType::Database, "db-1")
                .with_name("orders-db")
                .with_cost(300.0),
        ])
        .await
        .unwrap();

    let names = |nodes: Vec<infragraph_graph::GraphNode>| nodes.into_iter().map(|n| n.name).collect::<Vec<_>>();

    let prod = store.query_nodes(&NodeFilter::new().tag("env", "prod")).await.unwrap();
    assert_eq!(names(prod), vec!["api-blue", "api-green"]);

    let subset = store
        .query_nodes(&NodeFilter::new().tag("env", "prod").tag("team", "core"))
        .await
        .unwrap();
    assert_eq!(names(subset), vec!["api-blue"]);

    let by_name = store.query_nodes(&NodeFilter::new().name_contains("api")).await.unwrap();
    assert_eq!(by_name.len(), 2);

    let costly = store
        .query_nodes(&NodeFilter::new().cost_between(Some(100.0), Some(300.0)))
        .await
        .unwrap();
    assert_eq!(names(costly), vec!["api-blue", "orders-db"]);

    let statuses = store
        .query_nodes(&NodeFilter::new().status(NodeStatus::Running).status(NodeStatus::Stopped))
        .await
        .unwrap();
    assert_eq!(statuses.len(), 3);

    let region = store.query_nodes(&NodeFilter::new().region("eu-west-1")).await.unwrap();
    assert_eq!(names(region), vec!["orders-db"]);

    let types = store
        .query_nodes(&NodeFilter::new().resource_type(ResourceType::Database))
        .await
        .unwrap();
    assert_eq!(types.len(), 1);

    let owned = store.query_nodes(&NodeFilter::new().owner("alice")).await.unwrap();
    assert_eq!(names(owned), vec!["api-blue"]);

    let invalid = store.query_nodes(&NodeFilter::new().tag("bad\"key", "x")).await;
    assert!(matches!(invalid, Err(GraphError::InvalidTagFilter(_))));
}
storage_contract!(node_filters);

async fn pagination_round_trip(store: &dyn GraphStorage) {
    let nodes: Vec<NodeInput> = (0..25).map(|i| node(&format!("i-{i:02}"))).collect();
    store.upsert_nodes(&nodes).await.unwrap();

    let mut seen = Vec::new();
    let mut cursor = None;
    let mut pages = 0;
    loop {
        let page = store
            .query_nodes_paginated(
                &NodeFilter::default(),
                &PageOptions {
                    limit: Some(10),
                    cursor: cursor.clone(),
                },
            )
            .await
            .unwrap();
        pages += 1;
        assert_eq!(page.total_count, 25);
        assert_eq!(page.has_more, page.next_cursor.is_some());
        seen.extend(page.items.into_iter().map(|n| n.native_id));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(pages, 3);
    assert_eq!(seen.len(), 25);
    assert_eq!(seen.first().map(String::as_str), Some("i-00"));

    let bad = store
        .query_nodes_paginated(
            &NodeFilter::default(),
            &PageOptions {
                limit: None,
                cursor: Some("not-a-cursor".into()),
            },
        )
        .await;
    assert!(matches!(bad, Err(GraphError::InvalidCursor(_))));

    let default_page = store
        .query_nodes_paginated(&NodeFilter::default(), &PageOptions::default())
        .await
        .unwrap();
    assert_eq!(default_page.items.len(), 25);
    assert!(!default_page.has_more);
}
storage_contract!(pagination_round_trip);

async fn change_log(store: &dyn GraphStorage) {
    let target = node("i-1").id;
    let base = Utc::now();
    let changes = vec![
        GraphChange::new(&target, ChangeType::NodeCreated, "sync")
            .with_correlation("run-1")
            .with_initiator("infragraph-sync", InitiatorType::System)
            .detected_at(base),
        GraphChange::new(&target, ChangeType::NodeUpdated, "sync")
            .with_field("status", Some("running".into()), Some("stopped".into()))
            .with_correlation("run-2")
            .detected_at(base + chrono::Duration::seconds(10)),
        GraphChange::new("other", ChangeType::NodeCreated, "manual")
            .with_initiator("bob", InitiatorType::Human)
            .detected_at(base + chrono::Duration::seconds(5)),
    ];
    store.append_changes(&changes).await.unwrap();

    let all = store.get_changes(&ChangeFilter::default()).await.unwrap();
    let order: Vec<ChangeType> = all.iter().map(|c| c.change_type).collect();
    assert_eq!(
        order,
        vec![ChangeType::NodeCreated, ChangeType::NodeCreated, ChangeType::NodeUpdated]
    );

    let run_two = store
        .get_changes(&ChangeFilter {
            correlation_id: Some("run-2".into()),
            ..ChangeFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(run_two.len(), 1);
    assert_eq!(run_two[0].previous_value.as_deref(), Some("running"));

    let humans = store
        .get_changes(&ChangeFilter {
            initiator_type: Some(InitiatorType::Human),
            ..ChangeFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(humans.len(), 1);

    let window = store
        .get_changes(&ChangeFilter {
            since: Some(base + chrono::Duration::seconds(1)),
            until: Some(base + chrono::Duration::seconds(10)),
            ..ChangeFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].target_id, "other");

    let timeline = store.get_node_timeline(&target, 10).await.unwrap();
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0].change_type, ChangeType::NodeUpdated);
    assert_eq!(store.get_node_timeline(&target, 1).await.unwrap().len(), 1);

    let duplicate = store.append_change(&changes[0]).await;
    assert!(matches!(duplicate, Err(GraphError::Conflict(_))));
}
storage_contract!(change_log);

async fn groups(store: &dyn GraphStorage) {
    let (a, b) = (node("a"), node("b"));
    store.upsert_nodes(&[a.clone(), b.clone()]).await.unwrap();
    let app = GraphGroup::new("checkout", GroupType::Application);
    let team = GraphGroup::new("platform", GroupType::Team);
    store.upsert_group(&app).await.unwrap();
    store.upsert_group(&team).await.unwrap();

    store.add_group_member(&app.id, &a.id).await.unwrap();
    store.add_group_member(&app.id, &a.id).await.unwrap();
    store.add_group_member(&app.id, &b.id).await.unwrap();
    store.add_group_member(&team.id, &a.id).await.unwrap();

    assert_eq!(store.get_group_members(&app.id).await.unwrap().len(), 2);
    let a_groups: Vec<String> = store
        .get_node_groups(&a.id)
        .await
        .unwrap()
        .into_iter()
        .map(|g| g.name)
        .collect();
    assert_eq!(a_groups, vec!["checkout", "platform"]);

    let teams = store.list_groups(Some(GroupType::Team)).await.unwrap();
    assert_eq!(teams.len(), 1);

    assert!(store.remove_group_member(&app.id, &b.id).await.unwrap());
    assert!(!store.remove_group_member(&app.id, &b.id).await.unwrap());

    assert!(store.delete_group(&app.id).await.unwrap());
    assert!(store.get_node(&a.id).await.unwrap().is_some());
    assert_eq!(store.get_node_groups(&a.id).await.unwrap().len(), 1);

    let missing = store.add_group_member("missing", &a.id).await;
    assert!(matches!(missing, Err(GraphError::GroupNotFound(_))));
}
storage_contract!(groups);

fn sync_record(id: &str, provider: &str, offset_secs: i64) -> SyncRecord {
    let started_at = Utc::now() + chrono::Duration::seconds(offset_secs);
    SyncRecord {
        id: id.to_string(),
        provider: provider.to_string(),
        status: SyncStatus::Completed,
        started_at,
        completed_at: started_at + chrono::Duration::seconds(2),
        duration_ms: 2000,
        nodes_discovered: 3,
        nodes_created: 3,
        nodes_updated: 0,
        nodes_disappeared: 0,
        edges_discovered: 1,
        edges_created: 1,
        edges_updated: 0,
        errors: Vec::new(),
    }
}

async fn sync_records(store: &dyn GraphStorage) {
    store.save_sync_record(&sync_record("s1", "aws", -60)).await.unwrap();
    store.save_sync_record(&sync_record("s2", "gcp", -30)).await.unwrap();
    store.save_sync_record(&sync_record("s3", "aws", 0)).await.unwrap();

    let conflict = store.save_sync_record(&sync_record("s1", "aws", 0)).await;
    assert!(matches!(conflict, Err(GraphError::Conflict(_))));

    assert_eq!(store.get_last_sync_record(None).await.unwrap().unwrap().id, "s3");
    assert_eq!(store.get_last_sync_record(Some("gcp")).await.unwrap().unwrap().id, "s2");

    let aws: Vec<String> = store
        .list_sync_records(Some("aws"), 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(aws, vec!["s3", "s1"]);
    assert_eq!(store.list_sync_records(None, 2).await.unwrap().len(), 2);
}
storage_contract!(sync_records);

async fn stats(store: &dyn GraphStorage) {
    let a = node("a").with_cost(10.0);
    let b = NodeInput::new(CloudProvider::Azure, "sub", "westeurope", ResourceType::Storage, "disk").with_cost(5.0);
    store.upsert_nodes(&[a.clone(), b.clone()]).await.unwrap();
    store.upsert_edge(&edge(&a, &b, RelationshipType::AttachedTo)).await.unwrap();
    store
        .append_change(&GraphChange::new(&a.id, ChangeType::NodeCreated, "sync"))
        .await
        .unwrap();
    store.save_sync_record(&sync_record("s1", "aws", 0)).await.unwrap();

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.total_nodes, 2);
    assert_eq!(stats.total_edges, 1);
    assert_eq!(stats.nodes_by_provider.get("azure"), Some(&1));
    assert_eq!(stats.nodes_by_resource_type.get("compute"), Some(&1));
    assert_eq!(stats.edges_by_relationship_type.get("attached-to"), Some(&1));
    assert!((stats.total_cost_monthly - 15.0).abs() < 1e-9);
    assert_eq!(stats.total_changes, 1);
    assert!(stats.last_sync_at.is_some());
    assert!(stats.oldest_change_at.is_some());
}
storage_contract!(stats);

async fn batch_is_atomic_for_changes(store: &dyn GraphStorage) {
    let first = GraphChange::new("n", ChangeType::NodeCreated, "sync");
    store.append_change(&first).await.unwrap();
    let batch = vec![GraphChange::new("n", ChangeType::NodeUpdated, "sync"), first.clone()];
    assert!(store.append_changes(&batch).await.is_err());
    assert_eq!(store.get_changes(&ChangeFilter::default()).await.unwrap().len(), 1);
}
storage_contract!(batch_is_atomic_for_changes);

async fn snapshot_diff_identity(graph: &dyn GraphStorage, snapshots: &dyn SnapshotStore) {
    let (a, b) = (node("a").with_cost(4.0), node("b"));
    graph.upsert_nodes(&[a.clone(), b.clone()]).await.unwrap();
    graph.upsert_edge(&edge(&a, &b, RelationshipType::DependsOn)).await.unwrap();
    let snap = snapshots
        .create_snapshot(graph, SnapshotTrigger::Manual, None, None)
        .await
        .unwrap();

    let diff = snapshots.diff_snapshots(&snap.id, &snap.id).await.unwrap();
    assert!(diff.is_empty());
    assert_eq!(diff.cost_delta, 0.0);
}
snapshot_contract!(snapshot_diff_identity);

async fn snapshot_diff_detects_changes(graph: &dyn GraphStorage, snapshots: &dyn SnapshotStore) {
    let (a, b, c) = (node("a").with_cost(10.0), node("b"), node("c"));
    graph.upsert_nodes(&[a.clone(), b.clone()]).await.unwrap();
    graph.upsert_edge(&edge(&a, &b, RelationshipType::DependsOn)).await.unwrap();
    let before = snapshots
        .create_snapshot(graph, SnapshotTrigger::Manual, Some("before"), None)
        .await
        .unwrap();

    graph.delete_node(&b.id).await.unwrap();
    graph
        .upsert_node(&a.clone().with_cost(25.0).with_tag("env", "prod"))
        .await
        .unwrap();
    graph.upsert_node(&c).await.unwrap();
    graph.upsert_edge(&edge(&a, &c, RelationshipType::Uses)).await.unwrap();
    let after = snapshots
        .create_snapshot(graph, SnapshotTrigger::Manual, Some("after"), None)
        .await
        .unwrap();

    let diff = snapshots.diff_snapshots(&before.id, &after.id).await.unwrap();
    assert_eq!(diff.added_nodes.len(), 1);
    assert_eq!(diff.added_nodes[0].id, c.id);
    assert_eq!(diff.removed_nodes.len(), 1);
    assert_eq!(diff.removed_nodes[0].id, b.id);
    assert_eq!(diff.changed_nodes.len(), 1);
    let fields: Vec<&str> = diff.changed_nodes[0].fields.iter().map(|f| f.field.as_str()).collect();
    assert_eq!(fields, vec!["costMonthly", "tags"]);
    assert_eq!(diff.added_edges.len(), 1);
    assert_eq!(diff.removed_edges.len(), 1);
    assert!((diff.cost_delta - 15.0).abs() < 1e-9);

    let filtered = snapshots
        .get_nodes_at_snapshot(&after.id, Some(&NodeFilter::new().tag("env", "prod")))
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);

    let missing = snapshots.diff_snapshots(&before.id, "missing").await;
    assert!(matches!(missing, Err(GraphError::SnapshotNotFound(_))));
}
snapshot_contract!(snapshot_diff_detects_changes);

async fn retention_keeps_newest(graph: &dyn GraphStorage, snapshots: &dyn SnapshotStore) {
    graph.upsert_node(&node("a")).await.unwrap();
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(
            snapshots
                .create_snapshot(graph, SnapshotTrigger::Scheduled, None, None)
                .await
                .unwrap()
                .id,
        );
    }

    let deleted = snapshots
        .prune_snapshots(&RetentionPolicy {
            max_snapshots: Some(3),
            max_age_ms: None,
        })
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    let remaining: Vec<String> = snapshots
        .list_snapshots(&Default::default())
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    let newest: Vec<String> = ids.iter().rev().take(3).cloned().collect();
    assert_eq!(remaining, newest);

    assert!(snapshots.get_nodes_at_snapshot(&ids[0], None).await.unwrap().is_empty());

    let invalid = snapshots
        .prune_snapshots(&RetentionPolicy {
            max_snapshots: Some(0),
            max_age_ms: None,
        })
        .await;
    assert!(matches!(invalid, Err(GraphError::InvalidRetention(_))));
    assert_eq!(snapshots.prune_snapshots(&RetentionPolicy::default()).await.unwrap(), 0);
}
snapshot_contract!(retention_keeps_newest);

async fn retention_by_age(graph: &dyn GraphStorage, snapshots: &dyn SnapshotStore) {
    graph.upsert_node(&node("a")).await.unwrap();
    snapshots
        .create_snapshot(graph, SnapshotTrigger::Scheduled, None, None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    let recent = snapshots
        .create_snapshot(graph, SnapshotTrigger::Scheduled, None, None)
        .await
        .unwrap();

    let deleted = snapshots
        .prune_snapshots(&RetentionPolicy {
            max_snapshots: None,
            max_age_ms: Some(30),
        })
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(snapshots.get_snapshot(&recent.id).await.unwrap().is_some());
}
snapshot_contract!(retention_by_age);

async fn snapshot_lookup_by_time(graph: &dyn GraphStorage, snapshots: &dyn SnapshotStore) {
    assert!(snapshots.get_snapshot_at(Utc::now()).await.unwrap().is_none());

    let before_any = Utc::now() - chrono::Duration::hours(1);
    graph.upsert_node(&node("a")).await.unwrap();
    let first = snapshots
        .create_snapshot(graph, SnapshotTrigger::Manual, None, None)
        .await
        .unwrap();
    pause().await;
    let between = Utc::now();
    pause().await;
    let second = snapshots
        .create_snapshot(graph, SnapshotTrigger::Sync, None, Some(CloudProvider::Aws))
        .await
        .unwrap();

    assert_eq!(snapshots.get_snapshot_at(between).await.unwrap().unwrap().id, first.id);
    assert_eq!(snapshots.get_snapshot_at(Utc::now()).await.unwrap().unwrap().id, second.id);
    // Nothing at or before: fall back to the oldest
    assert_eq!(snapshots.get_snapshot_at(before_any).await.unwrap().unwrap().id, first.id);

    let syncs = snapshots
        .list_snapshots(&infragraph_graph::SnapshotFilter {
            trigger: Some(SnapshotTrigger::Sync),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(syncs.len(), 1);
    assert_eq!(syncs[0].provider, Some(CloudProvider::Aws));

    let history = snapshots.get_node_history(&node("a").id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].snapshot_id, second.id);
}
snapshot_contract!(snapshot_lookup_by_time);
