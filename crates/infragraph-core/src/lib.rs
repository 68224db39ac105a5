use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use infragraph_graph::{
    GraphStorage, InMemoryGraphStore, InMemorySnapshotStore, SnapshotStore, SqliteGraphStore, SqliteSnapshotStore,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

pub mod adapters;
pub mod config;
pub mod scheduler;
pub mod sync;

pub use adapters::{
    AdapterRegistry, DiscoverOptions, DiscoveryAdapter, DiscoveryResult, FixtureClient, ResourceClient,
    RuleDrivenAdapter,
};
pub use config::{AdapterConfig, InfraConfig, RetentionConfig, ServiceMapping, StorageBackend};
pub use scheduler::{ScheduledSync, SchedulerConfig, SyncReason, SyncScheduler};
pub use sync::{SyncEngine, SyncOutcome, SyncSettings, SYNC_INITIATOR};

#[derive(Debug, Clone)]
pub struct InfraPaths {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
}

impl InfraPaths {
    pub fn from_env() -> Self {
        if let Some(dir) = std::env::var_os("INFRAGRAPH_DATA_DIR") {
            return Self::from_base(PathBuf::from(dir));
        }
        if let Some(dirs) = directories::ProjectDirs::from("dev", "infragraph", "infragraph") {
            return Self::from_base(dirs.data_dir().to_path_buf());
        }
        Self::from_base(PathBuf::from(".infragraph"))
    }

    pub fn from_base(base_dir: PathBuf) -> Self {
        let db_path = base_dir.join("infragraph.db");
        let config_path = base_dir.join("infragraph.toml");
        Self {
            base_dir,
            db_path,
            config_path,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }
}

/// Open (creating if needed) a SQLite database with both graph and
/// snapshot schemas in place.
pub async fn open_sqlite(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let options = SqliteConnectOptions::from_str("sqlite:")?
        .filename(db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    SqliteGraphStore::init_schema(&pool).await?;
    SqliteSnapshotStore::init_schema(&pool).await?;
    Ok(pool)
}

/// A configured graph: storage, snapshots and adapters.
#[derive(Clone)]
pub struct InfraGraph {
    pub storage: Arc<dyn GraphStorage>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub registry: Arc<AdapterRegistry>,
    pub config: InfraConfig,
}

impl InfraGraph {
    /// Load the config file under `paths` and open the configured backend.
    pub async fn init(paths: &InfraPaths) -> Result<Self> {
        let config = InfraConfig::load(&paths.config_path)?;
        Self::with_config(config, paths).await
    }

    pub async fn with_config(config: InfraConfig, paths: &InfraPaths) -> Result<Self> {
        let (storage, snapshots): (Arc<dyn GraphStorage>, Arc<dyn SnapshotStore>) = match config.storage.backend {
            StorageBackend::Memory => (
                Arc::new(InMemoryGraphStore::new()),
                Arc::new(InMemorySnapshotStore::new()),
            ),
            StorageBackend::Sqlite => {
                let db_path = config.storage.path.clone().unwrap_or_else(|| paths.db_path.clone());
                info!(path = %db_path.display(), "opening graph database");
                let pool = open_sqlite(&db_path).await?;
                (
                    Arc::new(SqliteGraphStore::new(pool.clone())),
                    Arc::new(SqliteSnapshotStore::new(pool)),
                )
            }
        };
        let registry = Arc::new(AdapterRegistry::from_config(&config)?);
        Ok(Self {
            storage,
            snapshots,
            registry,
            config,
        })
    }

    pub fn sync_engine(&self) -> SyncEngine {
        SyncEngine::new(self.storage.clone(), self.snapshots.clone()).with_settings(SyncSettings::from(&self.config))
    }

    /// Sync one registered adapter.
    pub async fn sync_adapter(&self, name: &str, options: &DiscoverOptions) -> Result<SyncOutcome> {
        let adapter = self
            .registry
            .get(name)
            .ok_or_else(|| anyhow!("Unknown or disabled adapter: {}", name))?;
        self.sync_engine().run(adapter.as_ref(), options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infragraph_graph::NodeFilter;

    #[test]
    fn test_paths_from_base() {
        let paths = InfraPaths::from_base(PathBuf::from("/tmp/ig"));
        assert_eq!(paths.db_path, PathBuf::from("/tmp/ig/infragraph.db"));
        assert_eq!(paths.config_path, PathBuf::from("/tmp/ig/infragraph.toml"));
    }

    #[tokio::test]
    async fn test_init_from_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = InfraPaths::from_base(dir.path().to_path_buf());
        std::fs::write(
            dir.path().join("cluster.json"),
            r#"{"global": {"namespaces": [{"metadata": {"name": "payments"}}]}}"#,
        )
        .unwrap();
        std::fs::write(
            &paths.config_path,
            r#"
[adapters.kind]
provider = "kubernetes"
account = "kind-local"
fixture = "cluster.json"

[[adapters.kind.services]]
service = "namespaces"
resource_type = "namespace"
id_field = "metadata.name"
global = true
"#,
        )
        .unwrap();

        let graph = InfraGraph::init(&paths).await.unwrap();
        assert!(paths.db_path.exists());
        assert_eq!(graph.registry.list_available(), vec!["kind"]);

        let outcome = graph.sync_adapter("kind", &DiscoverOptions::default()).await.unwrap();
        assert_eq!(outcome.record.nodes_created, 1);
        let nodes = graph.storage.query_nodes(&NodeFilter::default()).await.unwrap();
        assert_eq!(nodes[0].id, "kubernetes:kind-local:global:namespace:payments");

        assert!(graph.sync_adapter("missing", &DiscoverOptions::default()).await.is_err());
    }
}
