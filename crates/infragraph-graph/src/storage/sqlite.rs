//! Graph storage operations for SQLite.
//!
//! Tags, metadata and error lists live in JSON text columns; timestamps are
//! fixed-width RFC 3339 strings so range predicates compare correctly as text.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use super::{format_ts, now_micros, parse_opt_ts, parse_tag, parse_ts, GraphStorage};
use crate::error::{GraphError, Result};
use crate::query::{
    ChangeFilter, EdgeFilter, GraphStats, NodeFilter, Page, PageOptions, Subgraph, TraversalDirection,
    MAX_TRAVERSAL_DEPTH,
};
use crate::records::{
    ChangeType, GraphChange, GraphGroup, GraphGroupMember, GroupType, InitiatorType, SyncRecord, SyncStatus,
};
use crate::schema::{
    CloudProvider, DiscoveryMethod, EdgeInput, GraphEdge, GraphNode, NodeInput, NodeStatus, RelationshipType,
    ResourceType,
};

const NODE_COLUMNS: &str = "id, provider, resource_type, native_id, name, region, account, status, tags, \
     metadata, cost_monthly, owner, discovered_at, created_at, updated_at, last_seen_at";

const EDGE_COLUMNS: &str =
    "id, source_node_id, target_node_id, relationship_type, confidence, discovered_via, metadata, created_at, last_seen_at";

const CHANGE_COLUMNS: &str = "id, target_id, change_type, field, previous_value, new_value, detected_at, \
     detected_via, correlation_id, initiator, initiator_type, metadata";

const GROUP_COLUMNS: &str = "id, name, group_type, description, owner, tags, metadata, created_at, updated_at";

const SYNC_COLUMNS: &str = "id, provider, status, started_at, completed_at, duration_ms, nodes_discovered, \
     nodes_created, nodes_updated, nodes_disappeared, edges_discovered, edges_created, edges_updated, errors";

/// Graph storage backed by SQLite.
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    /// Create a new store with an existing connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the graph schema (called during DB setup).
    #[instrument(skip_all)]
    pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS graph_nodes (
                id TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                native_id TEXT NOT NULL,
                name TEXT NOT NULL,
                region TEXT NOT NULL,
                account TEXT NOT NULL,
                status TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '{}',
                metadata TEXT NOT NULL DEFAULT '{}',
                cost_monthly REAL,
                owner TEXT,
                discovered_at TEXT NOT NULL,
                created_at TEXT,
                updated_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        // Edges may reference nodes that are not stored yet
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS graph_edges (
                id TEXT PRIMARY KEY,
                source_node_id TEXT NOT NULL,
                target_node_id TEXT NOT NULL,
                relationship_type TEXT NOT NULL,
                confidence REAL NOT NULL,
                discovered_via TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS graph_changes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                target_id TEXT NOT NULL,
                change_type TEXT NOT NULL,
                field TEXT,
                previous_value TEXT,
                new_value TEXT,
                detected_at TEXT NOT NULL,
                detected_via TEXT NOT NULL,
                correlation_id TEXT,
                initiator TEXT,
                initiator_type TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS graph_groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                group_type TEXT NOT NULL,
                description TEXT,
                owner TEXT,
                tags TEXT NOT NULL DEFAULT '{}',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS graph_group_members (
                group_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                added_at TEXT NOT NULL,
                PRIMARY KEY (group_id, node_id)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_records (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                provider TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                nodes_discovered INTEGER NOT NULL,
                nodes_created INTEGER NOT NULL,
                nodes_updated INTEGER NOT NULL,
                nodes_disappeared INTEGER NOT NULL,
                edges_discovered INTEGER NOT NULL,
                edges_created INTEGER NOT NULL,
                edges_updated INTEGER NOT NULL,
                errors TEXT NOT NULL DEFAULT '[]'
            )",
        )
        .execute(pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_nodes_provider ON graph_nodes(provider)",
            "CREATE INDEX IF NOT EXISTS idx_nodes_type ON graph_nodes(resource_type)",
            "CREATE INDEX IF NOT EXISTS idx_nodes_native ON graph_nodes(provider, native_id)",
            "CREATE INDEX IF NOT EXISTS idx_nodes_last_seen ON graph_nodes(last_seen_at)",
            "CREATE INDEX IF NOT EXISTS idx_nodes_name ON graph_nodes(name, id)",
            "CREATE INDEX IF NOT EXISTS idx_edges_source ON graph_edges(source_node_id)",
            "CREATE INDEX IF NOT EXISTS idx_edges_target ON graph_edges(target_node_id)",
            "CREATE INDEX IF NOT EXISTS idx_edges_relationship ON graph_edges(relationship_type)",
            "CREATE INDEX IF NOT EXISTS idx_changes_target ON graph_changes(target_id, detected_at)",
            "CREATE INDEX IF NOT EXISTS idx_changes_detected ON graph_changes(detected_at)",
            "CREATE INDEX IF NOT EXISTS idx_members_node ON graph_group_members(node_id)",
            "CREATE INDEX IF NOT EXISTS idx_sync_provider ON sync_records(provider, started_at)",
        ] {
            sqlx::query(index).execute(pool).await?;
        }

        Ok(())
    }

    /// Upsert one node inside an open transaction.
    async fn write_node(
        conn: &mut sqlx::SqliteConnection,
        node: &NodeInput,
        now: DateTime<Utc>,
    ) -> Result<GraphNode> {
        let now_str = format_ts(&now);
        let discovered_at: String = sqlx::query_scalar(
            "INSERT INTO graph_nodes (id, provider, resource_type, native_id, name, region, account, status,
                tags, metadata, cost_monthly, owner, discovered_at, created_at, updated_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?13, ?13)
             ON CONFLICT(id) DO UPDATE SET
                provider = excluded.provider,
                resource_type = excluded.resource_type,
                native_id = excluded.native_id,
                name = excluded.name,
                region = excluded.region,
                account = excluded.account,
                status = excluded.status,
                tags = excluded.tags,
                metadata = excluded.metadata,
                cost_monthly = excluded.cost_monthly,
                owner = excluded.owner,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                last_seen_at = excluded.last_seen_at
             RETURNING discovered_at",
        )
        .bind(&node.id)
        .bind(node.provider.as_str())
        .bind(node.resource_type.as_str())
        .bind(&node.native_id)
        .bind(&node.name)
        .bind(&node.region)
        .bind(&node.account)
        .bind(node.status.as_str())
        .bind(serde_json::to_string(&node.tags)?)
        .bind(serde_json::to_string(&node.metadata)?)
        .bind(node.cost_monthly)
        .bind(&node.owner)
        .bind(&now_str)
        .bind(node.created_at.as_ref().map(format_ts))
        .fetch_one(&mut *conn)
        .await?;

        let discovered_at = parse_ts("discovered_at", &discovered_at)?;
        Ok(GraphNode::from_input(node, Some(discovered_at), now))
    }

    async fn write_edge(
        conn: &mut sqlx::SqliteConnection,
        edge: &EdgeInput,
        now: DateTime<Utc>,
    ) -> Result<GraphEdge> {
        let created_at: String = sqlx::query_scalar(
            "INSERT INTO graph_edges (id, source_node_id, target_node_id, relationship_type, confidence,
                discovered_via, metadata, created_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(id) DO UPDATE SET
                confidence = excluded.confidence,
                discovered_via = excluded.discovered_via,
                metadata = excluded.metadata,
                last_seen_at = excluded.last_seen_at
             RETURNING created_at",
        )
        .bind(&edge.id)
        .bind(&edge.source_node_id)
        .bind(&edge.target_node_id)
        .bind(edge.relationship_type.as_str())
        .bind(edge.confidence)
        .bind(edge.discovered_via.as_str())
        .bind(serde_json::to_string(&edge.metadata)?)
        .bind(format_ts(&now))
        .fetch_one(&mut *conn)
        .await?;

        let created_at = parse_ts("created_at", &created_at)?;
        Ok(GraphEdge::from_input(edge, Some(created_at), now))
    }

    async fn write_change(conn: &mut sqlx::SqliteConnection, change: &GraphChange) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO graph_changes (id, target_id, change_type, field, previous_value, new_value,
                detected_at, detected_via, correlation_id, initiator, initiator_type, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&change.id)
        .bind(&change.target_id)
        .bind(change.change_type.as_str())
        .bind(&change.field)
        .bind(&change.previous_value)
        .bind(&change.new_value)
        .bind(format_ts(&change.detected_at))
        .bind(&change.detected_via)
        .bind(&change.correlation_id)
        .bind(&change.initiator)
        .bind(change.initiator_type.map(|t| t.as_str()))
        .bind(serde_json::to_string(&change.metadata)?)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GraphError::Conflict(change.id.clone()));
        }
        Ok(())
    }

    async fn fetch_nodes(&self, qb: &mut QueryBuilder<'_, Sqlite>) -> Result<Vec<GraphNode>> {
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn fetch_edges(&self, qb: &mut QueryBuilder<'_, Sqlite>) -> Result<Vec<GraphEdge>> {
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn fetch_groups(&self, qb: &mut QueryBuilder<'_, Sqlite>) -> Result<Vec<GraphGroup>> {
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(group_from_row).collect()
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn grouped_counts(&self, sql: &str) -> Result<BTreeMap<String, u64>> {
        let rows = sqlx::query_as::<_, (String, i64)>(sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(k, v)| (k, v as u64)).collect())
    }
}

/// One orientation of the edge table as `(src, dst)` pairs.
/// Open a `WITH RECURSIVE` clause defining `reached(id)`: every id within
/// `depth` hops of `node_id`, the start included.
///
/// The walk is keyed on `(node_id, depth)` and combined with `UNION`, so
/// each node is expanded at most once per level and the row count stays
/// bounded by nodes times depth whatever the fan-out or cycles.
fn push_reached_cte(
    qb: &mut QueryBuilder<'_, Sqlite>,
    node_id: &str,
    depth: usize,
    direction: TraversalDirection,
    edge_types: Option<&[RelationshipType]>,
) {
    qb.push("WITH RECURSIVE walk(node_id, depth) AS (SELECT ");
    qb.push_bind(node_id.to_string());
    qb.push(", 0");
    match direction {
        TraversalDirection::Downstream => push_walk_step(qb, "source_node_id", "target_node_id", depth, edge_types),
        TraversalDirection::Upstream => push_walk_step(qb, "target_node_id", "source_node_id", depth, edge_types),
        TraversalDirection::Both => {
            push_walk_step(qb, "source_node_id", "target_node_id", depth, edge_types);
            push_walk_step(qb, "target_node_id", "source_node_id", depth, edge_types);
        }
    }
    qb.push("), reached(id) AS (SELECT DISTINCT node_id FROM walk) ");
}

fn push_walk_step(
    qb: &mut QueryBuilder<'_, Sqlite>,
    from: &str,
    to: &str,
    depth: usize,
    edge_types: Option<&[RelationshipType]>,
) {
    qb.push(format!(
        " UNION SELECT e.{to}, walk.depth + 1 FROM walk JOIN graph_edges e ON e.{from} = walk.node_id \
         WHERE walk.depth < "
    ));
    qb.push_bind(depth as i64);
    if let Some(types) = edge_types {
        push_in(qb, "e.relationship_type", types.iter().map(|t| t.as_str().to_string()));
    }
}

/// Append `AND column IN (...)`, or a never-true predicate for an empty set.
fn push_in(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, values: impl Iterator<Item = String>) {
    let values: Vec<String> = values.collect();
    if values.is_empty() {
        qb.push(" AND 1 = 0");
        return;
    }
    qb.push(format!(" AND {column} IN ("));
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}

/// Compile a node filter into `AND ...` predicates.
pub(crate) fn push_node_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &NodeFilter) {
    if let Some(provider) = filter.provider {
        qb.push(" AND provider = ").push_bind(provider.as_str());
    }
    if !filter.resource_types.is_empty() {
        push_in(qb, "resource_type", filter.resource_types.iter().map(|t| t.as_str().to_string()));
    }
    if let Some(region) = &filter.region {
        qb.push(" AND region = ").push_bind(region.clone());
    }
    if let Some(account) = &filter.account {
        qb.push(" AND account = ").push_bind(account.clone());
    }
    if !filter.statuses.is_empty() {
        push_in(qb, "status", filter.statuses.iter().map(|s| s.as_str().to_string()));
    }
    if let Some(owner) = &filter.owner {
        qb.push(" AND owner = ").push_bind(owner.clone());
    }
    if let Some(needle) = &filter.name_contains {
        qb.push(" AND instr(name, ").push_bind(needle.clone()).push(") > 0");
    }
    if filter.min_cost.is_some() || filter.max_cost.is_some() {
        qb.push(" AND cost_monthly IS NOT NULL");
    }
    if let Some(min) = filter.min_cost {
        qb.push(" AND cost_monthly >= ").push_bind(min);
    }
    if let Some(max) = filter.max_cost {
        qb.push(" AND cost_monthly <= ").push_bind(max);
    }
    for (key, value) in &filter.tags {
        qb.push(" AND json_extract(tags, ")
            .push_bind(format!("$.\"{key}\""))
            .push(") = ")
            .push_bind(value.clone());
    }
}

fn json_column<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &'static str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

pub(crate) fn node_from_row(row: &SqliteRow) -> Result<GraphNode> {
    Ok(GraphNode {
        id: row.try_get("id")?,
        provider: parse_tag("provider", &row.try_get::<String, _>("provider")?, CloudProvider::parse)?,
        resource_type: parse_tag(
            "resource_type",
            &row.try_get::<String, _>("resource_type")?,
            ResourceType::parse,
        )?,
        native_id: row.try_get("native_id")?,
        name: row.try_get("name")?,
        region: row.try_get("region")?,
        account: row.try_get("account")?,
        status: parse_tag("status", &row.try_get::<String, _>("status")?, NodeStatus::parse)?,
        tags: json_column(row, "tags")?,
        metadata: json_column(row, "metadata")?,
        cost_monthly: row.try_get("cost_monthly")?,
        owner: row.try_get("owner")?,
        discovered_at: parse_ts("discovered_at", &row.try_get::<String, _>("discovered_at")?)?,
        created_at: parse_opt_ts("created_at", row.try_get("created_at")?)?,
        updated_at: parse_ts("updated_at", &row.try_get::<String, _>("updated_at")?)?,
        last_seen_at: parse_ts("last_seen_at", &row.try_get::<String, _>("last_seen_at")?)?,
    })
}

pub(crate) fn edge_from_row(row: &SqliteRow) -> Result<GraphEdge> {
    Ok(GraphEdge {
        id: row.try_get("id")?,
        source_node_id: row.try_get("source_node_id")?,
        target_node_id: row.try_get("target_node_id")?,
        relationship_type: parse_tag(
            "relationship_type",
            &row.try_get::<String, _>("relationship_type")?,
            RelationshipType::parse,
        )?,
        confidence: row.try_get("confidence")?,
        discovered_via: parse_tag(
            "discovered_via",
            &row.try_get::<String, _>("discovered_via")?,
            DiscoveryMethod::parse,
        )?,
        metadata: json_column(row, "metadata")?,
        created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
        last_seen_at: parse_ts("last_seen_at", &row.try_get::<String, _>("last_seen_at")?)?,
    })
}

fn change_from_row(row: &SqliteRow) -> Result<GraphChange> {
    let initiator_type: Option<String> = row.try_get("initiator_type")?;
    Ok(GraphChange {
        id: row.try_get("id")?,
        target_id: row.try_get("target_id")?,
        change_type: parse_tag("change_type", &row.try_get::<String, _>("change_type")?, ChangeType::parse)?,
        field: row.try_get("field")?,
        previous_value: row.try_get("previous_value")?,
        new_value: row.try_get("new_value")?,
        detected_at: parse_ts("detected_at", &row.try_get::<String, _>("detected_at")?)?,
        detected_via: row.try_get("detected_via")?,
        correlation_id: row.try_get("correlation_id")?,
        initiator: row.try_get("initiator")?,
        initiator_type: initiator_type
            .map(|t| parse_tag("initiator_type", &t, InitiatorType::parse))
            .transpose()?,
        metadata: json_column(row, "metadata")?,
    })
}

fn group_from_row(row: &SqliteRow) -> Result<GraphGroup> {
    Ok(GraphGroup {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        group_type: parse_tag("group_type", &row.try_get::<String, _>("group_type")?, GroupType::parse)?,
        description: row.try_get("description")?,
        owner: row.try_get("owner")?,
        tags: json_column(row, "tags")?,
        metadata: json_column(row, "metadata")?,
        created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts("updated_at", &row.try_get::<String, _>("updated_at")?)?,
    })
}

fn sync_record_from_row(row: &SqliteRow) -> Result<SyncRecord> {
    let count = |column: &'static str| -> Result<u64> { Ok(row.try_get::<i64, _>(column)? as u64) };
    Ok(SyncRecord {
        id: row.try_get("id")?,
        provider: row.try_get("provider")?,
        status: parse_tag("status", &row.try_get::<String, _>("status")?, SyncStatus::parse)?,
        started_at: parse_ts("started_at", &row.try_get::<String, _>("started_at")?)?,
        completed_at: parse_ts("completed_at", &row.try_get::<String, _>("completed_at")?)?,
        duration_ms: row.try_get("duration_ms")?,
        nodes_discovered: count("nodes_discovered")?,
        nodes_created: count("nodes_created")?,
        nodes_updated: count("nodes_updated")?,
        nodes_disappeared: count("nodes_disappeared")?,
        edges_discovered: count("edges_discovered")?,
        edges_created: count("edges_created")?,
        edges_updated: count("edges_updated")?,
        errors: json_column(row, "errors")?,
    })
}

#[async_trait]
impl GraphStorage for SqliteGraphStore {
    #[instrument(skip(self, node), fields(id = %node.id))]
    async fn upsert_node(&self, node: &NodeInput) -> Result<GraphNode> {
        let mut conn = self.pool.acquire().await?;
        Self::write_node(&mut conn, node, now_micros()).await
    }

    #[instrument(skip_all, fields(count = nodes.len()))]
    async fn upsert_nodes(&self, nodes: &[NodeInput]) -> Result<Vec<GraphNode>> {
        let now = now_micros();
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(nodes.len());
        for node in nodes {
            stored.push(Self::write_node(&mut tx, node, now).await?);
        }
        tx.commit().await?;
        Ok(stored)
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        let row = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM graph_nodes WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn get_node_by_native_id(&self, provider: CloudProvider, native_id: &str) -> Result<Option<GraphNode>> {
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM graph_nodes WHERE provider = ?1 AND native_id = ?2 ORDER BY id LIMIT 1"
        ))
        .bind(provider.as_str())
        .bind(native_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<GraphNode>> {
        filter.validate()?;
        let mut qb = QueryBuilder::new(format!("SELECT {NODE_COLUMNS} FROM graph_nodes WHERE 1 = 1"));
        push_node_filter(&mut qb, filter);
        qb.push(" ORDER BY name, id");
        self.fetch_nodes(&mut qb).await
    }

    #[instrument(skip(self))]
    async fn query_nodes_paginated(&self, filter: &NodeFilter, page: &PageOptions) -> Result<Page<GraphNode>> {
        let offset = page.offset()?;
        let limit = page.effective_limit();
        filter.validate()?;

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM graph_nodes WHERE 1 = 1");
        push_node_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {NODE_COLUMNS} FROM graph_nodes WHERE 1 = 1"));
        push_node_filter(&mut qb, filter);
        qb.push(" ORDER BY name, id LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(offset as i64);
        let items = self.fetch_nodes(&mut qb).await?;

        Ok(Page::from_window(items, offset, limit, total as usize))
    }

    #[instrument(skip(self))]
    async fn delete_node(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM graph_edges WHERE source_node_id = ?1 OR target_node_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM graph_group_members WHERE node_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM graph_nodes WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn mark_nodes_disappeared(
        &self,
        older_than: DateTime<Utc>,
        provider: Option<CloudProvider>,
        account: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut qb = QueryBuilder::new("UPDATE graph_nodes SET status = ");
        qb.push_bind(NodeStatus::Disappeared.as_str())
            .push(", updated_at = ")
            .push_bind(format_ts(&now_micros()))
            .push(" WHERE last_seen_at < ")
            .push_bind(format_ts(&older_than))
            .push(" AND status != ")
            .push_bind(NodeStatus::Disappeared.as_str());
        if let Some(provider) = provider {
            qb.push(" AND provider = ").push_bind(provider.as_str());
        }
        if let Some(account) = account {
            qb.push(" AND account = ").push_bind(account.to_string());
        }
        qb.push(" RETURNING id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut ids = rows
            .iter()
            .map(|row| row.try_get::<String, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ids.sort();
        debug!(count = ids.len(), "marked nodes disappeared");
        Ok(ids)
    }

    #[instrument(skip(self, edge), fields(id = %edge.id))]
    async fn upsert_edge(&self, edge: &EdgeInput) -> Result<GraphEdge> {
        let mut conn = self.pool.acquire().await?;
        Self::write_edge(&mut conn, edge, now_micros()).await
    }

    #[instrument(skip_all, fields(count = edges.len()))]
    async fn upsert_edges(&self, edges: &[EdgeInput]) -> Result<Vec<GraphEdge>> {
        let now = now_micros();
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(edges.len());
        for edge in edges {
            stored.push(Self::write_edge(&mut tx, edge, now).await?);
        }
        tx.commit().await?;
        Ok(stored)
    }

    async fn get_edge(&self, id: &str) -> Result<Option<GraphEdge>> {
        let row = sqlx::query(&format!("SELECT {EDGE_COLUMNS} FROM graph_edges WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(edge_from_row).transpose()
    }

    async fn delete_edge(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM graph_edges WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<GraphEdge>> {
        let mut qb = QueryBuilder::new(format!("SELECT {EDGE_COLUMNS} FROM graph_edges WHERE 1 = 1"));
        if let Some(source) = &filter.source_node_id {
            qb.push(" AND source_node_id = ").push_bind(source.clone());
        }
        if let Some(target) = &filter.target_node_id {
            qb.push(" AND target_node_id = ").push_bind(target.clone());
        }
        if !filter.relationship_types.is_empty() {
            push_in(
                &mut qb,
                "relationship_type",
                filter.relationship_types.iter().map(|t| t.as_str().to_string()),
            );
        }
        if let Some(via) = filter.discovered_via {
            qb.push(" AND discovered_via = ").push_bind(via.as_str());
        }
        if let Some(min) = filter.min_confidence {
            qb.push(" AND confidence >= ").push_bind(min);
        }
        qb.push(" ORDER BY id");
        self.fetch_edges(&mut qb).await
    }

    async fn get_edges_for_node(
        &self,
        node_id: &str,
        direction: TraversalDirection,
        relationship: Option<RelationshipType>,
    ) -> Result<Vec<GraphEdge>> {
        let mut qb = QueryBuilder::new(format!("SELECT {EDGE_COLUMNS} FROM graph_edges WHERE "));
        match direction {
            TraversalDirection::Downstream => {
                qb.push("source_node_id = ").push_bind(node_id.to_string());
            }
            TraversalDirection::Upstream => {
                qb.push("target_node_id = ").push_bind(node_id.to_string());
            }
            TraversalDirection::Both => {
                qb.push("(source_node_id = ")
                    .push_bind(node_id.to_string())
                    .push(" OR target_node_id = ")
                    .push_bind(node_id.to_string())
                    .push(")");
            }
        }
        if let Some(relationship) = relationship {
            qb.push(" AND relationship_type = ").push_bind(relationship.as_str());
        }
        qb.push(" ORDER BY id");
        self.fetch_edges(&mut qb).await
    }

    #[instrument(skip(self, edge_types))]
    async fn get_neighbors(
        &self,
        node_id: &str,
        depth: usize,
        direction: TraversalDirection,
        edge_types: Option<&[RelationshipType]>,
    ) -> Result<Subgraph> {
        let depth = depth.min(MAX_TRAVERSAL_DEPTH);
        let mut tx = self.pool.begin().await?;

        let mut node_qb = QueryBuilder::new("");
        push_reached_cte(&mut node_qb, node_id, depth, direction, edge_types);
        node_qb.push(format!(
            "SELECT {NODE_COLUMNS} FROM graph_nodes WHERE id IN (SELECT id FROM reached) ORDER BY name, id"
        ));
        let rows = node_qb.build().fetch_all(&mut *tx).await?;
        let nodes = rows.iter().map(node_from_row).collect::<Result<Vec<_>>>()?;

        let mut edge_qb = QueryBuilder::new("");
        push_reached_cte(&mut edge_qb, node_id, depth, direction, edge_types);
        edge_qb.push(format!(
            "SELECT {EDGE_COLUMNS} FROM graph_edges \
             WHERE source_node_id IN (SELECT id FROM reached) AND target_node_id IN (SELECT id FROM reached)"
        ));
        if let Some(types) = edge_types {
            push_in(&mut edge_qb, "relationship_type", types.iter().map(|t| t.as_str().to_string()));
        }
        edge_qb.push(" ORDER BY id");
        let rows = edge_qb.build().fetch_all(&mut *tx).await?;
        let edges = rows.iter().map(edge_from_row).collect::<Result<Vec<_>>>()?;
        tx.commit().await?;

        Ok(Subgraph { nodes, edges })
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> Result<GraphStats> {
        let total_cost: f64 = sqlx::query_scalar("SELECT TOTAL(cost_monthly) FROM graph_nodes")
            .fetch_one(&self.pool)
            .await?;
        let last_sync: Option<String> = sqlx::query_scalar("SELECT MAX(completed_at) FROM sync_records")
            .fetch_one(&self.pool)
            .await?;
        let (oldest, newest): (Option<String>, Option<String>) =
            sqlx::query_as("SELECT MIN(detected_at), MAX(detected_at) FROM graph_changes")
                .fetch_one(&self.pool)
                .await?;

        Ok(GraphStats {
            total_nodes: self.count("SELECT COUNT(*) FROM graph_nodes").await?,
            total_edges: self.count("SELECT COUNT(*) FROM graph_edges").await?,
            nodes_by_provider: self
                .grouped_counts("SELECT provider, COUNT(*) FROM graph_nodes GROUP BY provider")
                .await?,
            nodes_by_resource_type: self
                .grouped_counts("SELECT resource_type, COUNT(*) FROM graph_nodes GROUP BY resource_type")
                .await?,
            edges_by_relationship_type: self
                .grouped_counts("SELECT relationship_type, COUNT(*) FROM graph_edges GROUP BY relationship_type")
                .await?,
            total_cost_monthly: total_cost,
            total_changes: self.count("SELECT COUNT(*) FROM graph_changes").await?,
            total_groups: self.count("SELECT COUNT(*) FROM graph_groups").await?,
            last_sync_at: parse_opt_ts("completed_at", last_sync)?,
            oldest_change_at: parse_opt_ts("detected_at", oldest)?,
            newest_change_at: parse_opt_ts("detected_at", newest)?,
        })
    }

    async fn append_change(&self, change: &GraphChange) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::write_change(&mut conn, change).await
    }

    #[instrument(skip_all, fields(count = changes.len()))]
    async fn append_changes(&self, changes: &[GraphChange]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for change in changes {
            Self::write_change(&mut tx, change).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_changes(&self, filter: &ChangeFilter) -> Result<Vec<GraphChange>> {
        let mut qb = QueryBuilder::new(format!("SELECT {CHANGE_COLUMNS} FROM graph_changes WHERE 1 = 1"));
        if let Some(target) = &filter.target_id {
            qb.push(" AND target_id = ").push_bind(target.clone());
        }
        if !filter.change_types.is_empty() {
            push_in(&mut qb, "change_type", filter.change_types.iter().map(|t| t.as_str().to_string()));
        }
        if let Some(via) = &filter.detected_via {
            qb.push(" AND detected_via = ").push_bind(via.clone());
        }
        if let Some(correlation) = &filter.correlation_id {
            qb.push(" AND correlation_id = ").push_bind(correlation.clone());
        }
        if let Some(initiator) = &filter.initiator {
            qb.push(" AND initiator = ").push_bind(initiator.clone());
        }
        if let Some(initiator_type) = filter.initiator_type {
            qb.push(" AND initiator_type = ").push_bind(initiator_type.as_str());
        }
        if let Some(since) = &filter.since {
            qb.push(" AND detected_at >= ").push_bind(format_ts(since));
        }
        if let Some(until) = &filter.until {
            qb.push(" AND detected_at < ").push_bind(format_ts(until));
        }
        qb.push(" ORDER BY detected_at, seq");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(change_from_row).collect()
    }

    async fn get_node_timeline(&self, node_id: &str, limit: usize) -> Result<Vec<GraphChange>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHANGE_COLUMNS} FROM graph_changes WHERE target_id = ?1
             ORDER BY detected_at DESC, seq DESC LIMIT ?2"
        ))
        .bind(node_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(change_from_row).collect()
    }

    async fn upsert_group(&self, group: &GraphGroup) -> Result<()> {
        sqlx::query(
            "INSERT INTO graph_groups (id, name, group_type, description, owner, tags, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                group_type = excluded.group_type,
                description = excluded.description,
                owner = excluded.owner,
                tags = excluded.tags,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at",
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(group.group_type.as_str())
        .bind(&group.description)
        .bind(&group.owner)
        .bind(serde_json::to_string(&group.tags)?)
        .bind(serde_json::to_string(&group.metadata)?)
        .bind(format_ts(&group.created_at))
        .bind(format_ts(&group.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_group(&self, id: &str) -> Result<Option<GraphGroup>> {
        let row = sqlx::query(&format!("SELECT {GROUP_COLUMNS} FROM graph_groups WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(group_from_row).transpose()
    }

    async fn list_groups(&self, group_type: Option<GroupType>) -> Result<Vec<GraphGroup>> {
        let mut qb = QueryBuilder::new(format!("SELECT {GROUP_COLUMNS} FROM graph_groups WHERE 1 = 1"));
        if let Some(group_type) = group_type {
            qb.push(" AND group_type = ").push_bind(group_type.as_str());
        }
        qb.push(" ORDER BY name, id");
        self.fetch_groups(&mut qb).await
    }

    async fn delete_group(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM graph_group_members WHERE group_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM graph_groups WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_group_member(&self, group_id: &str, node_id: &str) -> Result<()> {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM graph_groups WHERE id = ?1")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(GraphError::GroupNotFound(group_id.to_string()));
        }
        sqlx::query(
            "INSERT INTO graph_group_members (group_id, node_id, added_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(group_id, node_id) DO NOTHING",
        )
        .bind(group_id)
        .bind(node_id)
        .bind(format_ts(&now_micros()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_group_member(&self, group_id: &str, node_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM graph_group_members WHERE group_id = ?1 AND node_id = ?2")
            .bind(group_id)
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_group_members(&self, group_id: &str) -> Result<Vec<GraphGroupMember>> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT group_id, node_id, added_at FROM graph_group_members WHERE group_id = ?1 ORDER BY node_id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(group_id, node_id, added_at)| -> Result<GraphGroupMember> {
                Ok(GraphGroupMember {
                    group_id,
                    node_id,
                    added_at: parse_ts("added_at", &added_at)?,
                })
            })
            .collect()
    }

    async fn get_node_groups(&self, node_id: &str) -> Result<Vec<GraphGroup>> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {GROUP_COLUMNS} FROM graph_groups WHERE id IN
             (SELECT group_id FROM graph_group_members WHERE node_id = "
        ));
        qb.push_bind(node_id.to_string()).push(") ORDER BY name, id");
        self.fetch_groups(&mut qb).await
    }

    #[instrument(skip(self, record), fields(id = %record.id, provider = %record.provider))]
    async fn save_sync_record(&self, record: &SyncRecord) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO sync_records (id, provider, status, started_at, completed_at, duration_ms,
                nodes_discovered, nodes_created, nodes_updated, nodes_disappeared,
                edges_discovered, edges_created, edges_updated, errors)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&record.id)
        .bind(&record.provider)
        .bind(record.status.as_str())
        .bind(format_ts(&record.started_at))
        .bind(format_ts(&record.completed_at))
        .bind(record.duration_ms)
        .bind(record.nodes_discovered as i64)
        .bind(record.nodes_created as i64)
        .bind(record.nodes_updated as i64)
        .bind(record.nodes_disappeared as i64)
        .bind(record.edges_discovered as i64)
        .bind(record.edges_created as i64)
        .bind(record.edges_updated as i64)
        .bind(serde_json::to_string(&record.errors)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GraphError::Conflict(record.id.clone()));
        }
        Ok(())
    }

    async fn get_last_sync_record(&self, provider: Option<&str>) -> Result<Option<SyncRecord>> {
        Ok(self.list_sync_records(provider, 1).await?.into_iter().next())
    }

    async fn list_sync_records(&self, provider: Option<&str>, limit: usize) -> Result<Vec<SyncRecord>> {
        let mut qb = QueryBuilder::new(format!("SELECT {SYNC_COLUMNS} FROM sync_records WHERE 1 = 1"));
        if let Some(provider) = provider {
            qb.push(" AND provider = ").push_bind(provider.to_string());
        }
        qb.push(" ORDER BY started_at DESC, seq DESC LIMIT ")
            .push_bind(limit as i64);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(sync_record_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteGraphStore::init_schema(&pool).await.unwrap();
        pool
    }

    fn compute(native_id: &str) -> NodeInput {
        NodeInput::new(CloudProvider::Aws, "123", "us-east-1", ResourceType::Compute, native_id)
    }

    #[tokio::test]
    async fn test_upsert_node_preserves_discovered_at() {
        let store = SqliteGraphStore::new(setup_test_db().await);

        let first = store.upsert_node(&compute("i-1").with_name("web")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store
            .upsert_node(&compute("i-1").with_name("web-2").with_tag("env", "prod"))
            .await
            .unwrap();

        assert_eq!(second.discovered_at, first.discovered_at);
        assert!(second.updated_at > first.updated_at);

        let loaded = store.get_node(&first.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "web-2");
        assert_eq!(loaded.discovered_at, first.discovered_at);
        assert_eq!(loaded.tags.get("env").map(String::as_str), Some("prod"));
    }

    #[tokio::test]
    async fn test_tag_filter_binds_key() {
        let store = SqliteGraphStore::new(setup_test_db().await);
        store
            .upsert_node(&compute("i-1").with_tag("team's", "core").with_tag("env", "prod"))
            .await
            .unwrap();

        let filter = NodeFilter::new().tag("team's", "core");
        assert_eq!(store.query_nodes(&filter).await.unwrap().len(), 1);
        let filter = NodeFilter::new().tag("env", "dev");
        assert!(store.query_nodes(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_change_rolls_back_batch() {
        let store = SqliteGraphStore::new(setup_test_db().await);
        let first = GraphChange::new("n1", ChangeType::NodeCreated, "sync");
        store.append_change(&first).await.unwrap();

        let fresh = GraphChange::new("n2", ChangeType::NodeCreated, "sync");
        let err = store.append_changes(&[fresh, first.clone()]).await.unwrap_err();
        assert!(matches!(err, GraphError::Conflict(_)));
        assert_eq!(store.get_changes(&ChangeFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_neighbors_respects_direction() {
        let store = SqliteGraphStore::new(setup_test_db().await);
        let (a, b, c) = (compute("a"), compute("b"), compute("c"));
        store.upsert_nodes(&[a.clone(), b.clone(), c.clone()]).await.unwrap();
        store
            .upsert_edges(&[
                EdgeInput::new(&a.id, &b.id, RelationshipType::DependsOn, DiscoveryMethod::ApiField),
                EdgeInput::new(&c.id, &b.id, RelationshipType::DependsOn, DiscoveryMethod::ApiField),
            ])
            .await
            .unwrap();

        let down = store
            .get_neighbors(&a.id, 5, TraversalDirection::Downstream, None)
            .await
            .unwrap();
        assert_eq!(down.nodes.len(), 2);
        assert_eq!(down.edges.len(), 1);

        let both = store.get_neighbors(&a.id, 5, TraversalDirection::Both, None).await.unwrap();
        assert_eq!(both.nodes.len(), 3);
        assert_eq!(both.edges.len(), 2);

        let filtered = store
            .get_neighbors(&a.id, 5, TraversalDirection::Both, Some(&[RelationshipType::Uses]))
            .await
            .unwrap();
        assert_eq!(filtered.nodes.len(), 1);
        assert!(filtered.edges.is_empty());
    }

    /// Make inserts of one row id fail mid-batch.
    async fn fail_insert(pool: &SqlitePool, table: &str, id: &str) {
        sqlx::query(&format!(
            "CREATE TRIGGER fail_{table} BEFORE INSERT ON {table} WHEN NEW.id = '{id}' \
             BEGIN SELECT RAISE(ABORT, 'write failed'); END"
        ))
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_node_batch_rolls_back_on_failure() {
        let pool = setup_test_db().await;
        let store = SqliteGraphStore::new(pool.clone());
        let (a, b, c) = (compute("i-a"), compute("i-b"), compute("i-c"));
        fail_insert(&pool, "graph_nodes", &b.id).await;

        assert!(store.upsert_nodes(&[a.clone(), b, c]).await.is_err());
        assert!(store.get_node(&a.id).await.unwrap().is_none());
        assert!(store.query_nodes(&NodeFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edge_batch_rolls_back_on_failure() {
        let pool = setup_test_db().await;
        let store = SqliteGraphStore::new(pool.clone());
        let (a, b, c) = (compute("i-a"), compute("i-b"), compute("i-c"));
        store.upsert_nodes(&[a.clone(), b.clone(), c.clone()]).await.unwrap();
        let first = EdgeInput::new(&a.id, &b.id, RelationshipType::DependsOn, DiscoveryMethod::ApiField);
        let second = EdgeInput::new(&a.id, &c.id, RelationshipType::DependsOn, DiscoveryMethod::ApiField);
        fail_insert(&pool, "graph_edges", &second.id).await;

        assert!(store.upsert_edges(&[first.clone(), second]).await.is_err());
        assert!(store.get_edge(&first.id).await.unwrap().is_none());
        assert!(store.query_edges(&EdgeFilter::default()).await.unwrap().is_empty());
        assert_eq!(store.query_nodes(&NodeFilter::default()).await.unwrap().len(), 3);
    }
}
