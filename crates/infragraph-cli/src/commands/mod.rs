pub mod history;
pub mod neighbors;
pub mod nodes;
pub mod snapshot;
pub mod stats;
pub mod sync;

use anyhow::{Context, Result};
use infragraph_core::{InfraGraph, InfraPaths};

/// Open the graph configured under `paths`.
pub async fn open_graph(paths: &InfraPaths) -> Result<InfraGraph> {
    paths.ensure_dirs()?;
    InfraGraph::init(paths)
        .await
        .with_context(|| format!("Failed to open graph in {}", paths.base_dir.display()))
}

/// Parse a `key=value` argument.
pub fn parse_tag(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("Invalid tag '{}'. Expected key=value", raw))?;
    Ok((key.to_string(), value.to_string()))
}

/// Shorten an RFC 3339 timestamp for tables.
pub fn short_time(at: &chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tag() {
        assert_eq!(parse_tag("env=prod").unwrap(), ("env".into(), "prod".into()));
        assert_eq!(parse_tag("url=a=b").unwrap(), ("url".into(), "a=b".into()));
        assert!(parse_tag("env").is_err());
    }
}
