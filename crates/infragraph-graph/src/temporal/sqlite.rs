//! Snapshot storage for SQLite.
//!
//! Versions are stored as full JSON documents keyed by
//! `(snapshot_id, entity_id)`; filters on frozen nodes are evaluated after
//! decoding so they match live-query semantics exactly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    capture_graph, EdgeVersion, GraphSnapshot, NodeVersion, SnapshotFilter, SnapshotStore, SnapshotTrigger,
};
use crate::error::Result;
use crate::query::{sort_nodes, NodeFilter};
use crate::schema::{CloudProvider, GraphEdge, GraphNode};
use crate::storage::{format_ts, now_micros, parse_tag, parse_ts, GraphStorage};

const SNAPSHOT_COLUMNS: &str =
    "seq, id, created_at, trigger_type, provider, label, node_count, edge_count, total_cost_monthly";

/// Snapshot store backed by SQLite.
#[derive(Clone)]
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the snapshot schema.
    #[instrument(skip_all)]
    pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
        // AUTOINCREMENT so a pruned sequence number is never reissued
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS graph_snapshots (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                provider TEXT,
                label TEXT,
                node_count INTEGER NOT NULL,
                edge_count INTEGER NOT NULL,
                total_cost_monthly REAL NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS snapshot_node_versions (
                snapshot_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (snapshot_id, node_id)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS snapshot_edge_versions (
                snapshot_id TEXT NOT NULL,
                edge_id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (snapshot_id, edge_id)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_created ON graph_snapshots(created_at, seq)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_node_versions_node ON snapshot_node_versions(node_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_edge_versions_edge ON snapshot_edge_versions(edge_id)")
            .execute(pool)
            .await?;

        Ok(())
    }

    async fn fetch_snapshots(&self, qb: &mut QueryBuilder<'_, Sqlite>) -> Result<Vec<GraphSnapshot>> {
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(snapshot_from_row).collect()
    }
}

fn snapshot_from_row(row: &SqliteRow) -> Result<GraphSnapshot> {
    let provider: Option<String> = row.try_get("provider")?;
    Ok(GraphSnapshot {
        id: row.try_get("id")?,
        seq: row.try_get("seq")?,
        created_at: parse_ts("created_at", &row.try_get::<String, _>("created_at")?)?,
        trigger: parse_tag(
            "trigger_type",
            &row.try_get::<String, _>("trigger_type")?,
            SnapshotTrigger::parse,
        )?,
        provider: provider
            .map(|p| parse_tag("provider", &p, CloudProvider::parse))
            .transpose()?,
        label: row.try_get("label")?,
        node_count: row.try_get::<i64, _>("node_count")? as u64,
        edge_count: row.try_get::<i64, _>("edge_count")? as u64,
        total_cost_monthly: row.try_get("total_cost_monthly")?,
    })
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    #[instrument(skip(self, graph))]
    async fn create_snapshot(
        &self,
        graph: &dyn GraphStorage,
        trigger: SnapshotTrigger,
        label: Option<&str>,
        provider: Option<CloudProvider>,
    ) -> Result<GraphSnapshot> {
        // Read before opening the transaction; the graph may share this pool.
        let captured = capture_graph(graph).await?;
        let id = Uuid::new_v4().to_string();
        let created_at = now_micros();

        let mut tx = self.pool.begin().await?;
        let seq: i64 = sqlx::query_scalar(
            "INSERT INTO graph_snapshots (id, created_at, trigger_type, provider, label,
                node_count, edge_count, total_cost_monthly)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             RETURNING seq",
        )
        .bind(&id)
        .bind(format_ts(&created_at))
        .bind(trigger.as_str())
        .bind(provider.map(|p| p.as_str()))
        .bind(label)
        .bind(captured.nodes.len() as i64)
        .bind(captured.edges.len() as i64)
        .bind(captured.total_cost_monthly)
        .fetch_one(&mut *tx)
        .await?;

        for node in &captured.nodes {
            sqlx::query("INSERT INTO snapshot_node_versions (snapshot_id, node_id, data) VALUES (?1, ?2, ?3)")
                .bind(&id)
                .bind(&node.id)
                .bind(serde_json::to_string(node)?)
                .execute(&mut *tx)
                .await?;
        }
        for edge in &captured.edges {
            sqlx::query("INSERT INTO snapshot_edge_versions (snapshot_id, edge_id, data) VALUES (?1, ?2, ?3)")
                .bind(&id)
                .bind(&edge.id)
                .bind(serde_json::to_string(edge)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let snapshot = GraphSnapshot {
            id,
            seq,
            created_at,
            trigger,
            provider,
            label: label.map(str::to_string),
            node_count: captured.nodes.len() as u64,
            edge_count: captured.edges.len() as u64,
            total_cost_monthly: captured.total_cost_monthly,
        };
        info!(id = %snapshot.id, nodes = snapshot.node_count, edges = snapshot.edge_count, "snapshot created");
        Ok(snapshot)
    }

    async fn get_snapshot(&self, id: &str) -> Result<Option<GraphSnapshot>> {
        let row = sqlx::query(&format!("SELECT {SNAPSHOT_COLUMNS} FROM graph_snapshots WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn list_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<GraphSnapshot>> {
        let mut qb = QueryBuilder::new(format!("SELECT {SNAPSHOT_COLUMNS} FROM graph_snapshots WHERE 1 = 1"));
        if let Some(since) = &filter.since {
            qb.push(" AND created_at >= ").push_bind(format_ts(since));
        }
        if let Some(until) = &filter.until {
            qb.push(" AND created_at <= ").push_bind(format_ts(until));
        }
        if let Some(trigger) = filter.trigger {
            qb.push(" AND trigger_type = ").push_bind(trigger.as_str());
        }
        if let Some(provider) = filter.provider {
            qb.push(" AND provider = ").push_bind(provider.as_str());
        }
        qb.push(" ORDER BY created_at DESC, seq DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        self.fetch_snapshots(&mut qb).await
    }

    #[instrument(skip(self))]
    async fn delete_snapshot(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM snapshot_node_versions WHERE snapshot_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM snapshot_edge_versions WHERE snapshot_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM graph_snapshots WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_nodes_at_snapshot(&self, snapshot_id: &str, filter: Option<&NodeFilter>) -> Result<Vec<GraphNode>> {
        if let Some(filter) = filter {
            filter.validate()?;
        }
        let rows = sqlx::query_as::<_, (String,)>("SELECT data FROM snapshot_node_versions WHERE snapshot_id = ?1")
            .bind(snapshot_id)
            .fetch_all(&self.pool)
            .await?;

        let mut nodes = Vec::with_capacity(rows.len());
        for (data,) in rows {
            let node: GraphNode = serde_json::from_str(&data)?;
            if filter.map_or(true, |f| f.matches(&node)) {
                nodes.push(node);
            }
        }
        sort_nodes(&mut nodes);
        Ok(nodes)
    }

    async fn get_edges_at_snapshot(&self, snapshot_id: &str) -> Result<Vec<GraphEdge>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT data FROM snapshot_edge_versions WHERE snapshot_id = ?1 ORDER BY edge_id",
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(data,)| -> Result<GraphEdge> { Ok(serde_json::from_str(&data)?) })
            .collect()
    }

    async fn get_node_history(&self, node_id: &str, limit: usize) -> Result<Vec<NodeVersion>> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT s.id, s.created_at, v.data
             FROM snapshot_node_versions v JOIN graph_snapshots s ON s.id = v.snapshot_id
             WHERE v.node_id = ?1
             ORDER BY s.created_at DESC, s.seq DESC
             LIMIT ?2",
        )
        .bind(node_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(snapshot_id, created_at, data)| -> Result<NodeVersion> {
                Ok(NodeVersion {
                    snapshot_id,
                    captured_at: parse_ts("created_at", &created_at)?,
                    node: serde_json::from_str(&data)?,
                })
            })
            .collect()
    }

    async fn get_edge_history(&self, edge_id: &str, limit: usize) -> Result<Vec<EdgeVersion>> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT s.id, s.created_at, v.data
             FROM snapshot_edge_versions v JOIN graph_snapshots s ON s.id = v.snapshot_id
             WHERE v.edge_id = ?1
             ORDER BY s.created_at DESC, s.seq DESC
             LIMIT ?2",
        )
        .bind(edge_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(snapshot_id, created_at, data)| -> Result<EdgeVersion> {
                Ok(EdgeVersion {
                    snapshot_id,
                    captured_at: parse_ts("created_at", &created_at)?,
                    edge: serde_json::from_str(&data)?,
                })
            })
            .collect()
    }

    async fn get_snapshot_at(&self, at: DateTime<Utc>) -> Result<Option<GraphSnapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM graph_snapshots WHERE created_at <= ?1
             ORDER BY created_at DESC, seq DESC LIMIT 1"
        ))
        .bind(format_ts(&at))
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = row {
            return snapshot_from_row(&row).map(Some);
        }

        let oldest = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM graph_snapshots ORDER BY created_at ASC, seq ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        oldest.as_ref().map(snapshot_from_row).transpose()
    }
}
