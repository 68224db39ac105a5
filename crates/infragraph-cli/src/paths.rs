//! Data directory resolution for the CLI.
//!
//! Must match infragraph-core's `InfraPaths::from_env()` so every tool
//! reads the same database and config.

use std::path::PathBuf;

use infragraph_core::InfraPaths;

/// Paths under `--data-dir` when given, else the environment default.
pub fn resolve(data_dir: Option<PathBuf>) -> InfraPaths {
    match data_dir {
        Some(dir) => InfraPaths::from_base(dir),
        None => InfraPaths::from_env(),
    }
}
