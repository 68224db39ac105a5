//! Resource clients: the capability an adapter lists provider records with.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;

/// Lists raw provider records for one (region, service) unit.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Check the client can be used. Called once at the start of a run.
    async fn check(&self) -> Result<()>;

    async fn list(&self, region: &str, service: &str) -> Result<Vec<Value>>;
}

/// Serves records from a JSON dump shaped
/// `{ "<region>": { "<service>": [record, ...] } }`.
///
/// The file is read on first use, not at construction.
pub struct FixtureClient {
    path: PathBuf,
    document: OnceCell<Value>,
}

impl FixtureClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: OnceCell::new(),
        }
    }

    /// A client over an already-parsed document.
    pub fn from_value(document: Value) -> Self {
        Self {
            path: PathBuf::from("<memory>"),
            document: OnceCell::from(document),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn document(&self) -> Result<&Value> {
        self.document
            .get_or_try_init(|| async {
                let raw = tokio::fs::read_to_string(&self.path)
                    .await
                    .with_context(|| format!("Failed to read fixture: {}", self.path.display()))?;
                let value: Value = serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse fixture: {}", self.path.display()))?;
                if !value.is_object() {
                    bail!("Fixture {} must be a JSON object keyed by region", self.path.display());
                }
                Ok::<Value, anyhow::Error>(value)
            })
            .await
    }
}

#[async_trait]
impl ResourceClient for FixtureClient {
    async fn check(&self) -> Result<()> {
        self.document().await.map(|_| ())
    }

    async fn list(&self, region: &str, service: &str) -> Result<Vec<Value>> {
        let document = self.document().await?;
        match document.get(region).and_then(|r| r.get(service)) {
            None => Ok(Vec::new()),
            Some(Value::Array(records)) => Ok(records.clone()),
            Some(_) => Err(anyhow!("{service} in {region}: expected a list of records")),
        }
    }
}

/// Stand-in for an adapter that has no client configured.
pub struct UnconfiguredClient {
    adapter: String,
}

impl UnconfiguredClient {
    pub fn new(adapter: impl Into<String>) -> Self {
        Self { adapter: adapter.into() }
    }
}

#[async_trait]
impl ResourceClient for UnconfiguredClient {
    async fn check(&self) -> Result<()> {
        Err(anyhow!(
            "No resource client configured for adapter '{}'. Set `fixture` or register a client.",
            self.adapter
        ))
    }

    async fn list(&self, _region: &str, _service: &str) -> Result<Vec<Value>> {
        self.check().await.map(|_| Vec::new())
    }
}
