use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod paths;
mod ui;

#[derive(Parser)]
#[command(name = "infragraph")]
#[command(about = "A queryable, versioned map of your infrastructure.")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to $INFRAGRAPH_DATA_DIR or the platform data dir)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover resources and reconcile them into the graph
    Sync {
        /// Adapters to sync. If omitted, syncs all enabled adapters.
        #[arg(value_name = "ADAPTERS")]
        adapters: Vec<String>,

        /// Sync all enabled adapters
        #[arg(long, short)]
        all: bool,

        /// Only sync adapters whose last sync is older than the interval
        #[arg(long)]
        due: bool,
    },

    /// Show graph totals
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List nodes matching filters
    Nodes {
        #[arg(long)]
        provider: Option<String>,

        /// Resource type (e.g. compute, database)
        #[arg(long = "type", value_name = "TYPE")]
        resource_type: Option<String>,

        #[arg(long)]
        status: Option<String>,

        /// Required tag, as key=value (repeatable)
        #[arg(long = "tag", value_name = "KEY=VALUE")]
        tags: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// Cursor from a previous page
        #[arg(long)]
        cursor: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show the neighborhood of a node
    Neighbors {
        #[arg(value_name = "NODE_ID")]
        id: String,

        #[arg(long, short, default_value = "1")]
        depth: usize,

        /// downstream, upstream or both
        #[arg(long, default_value = "both")]
        direction: String,

        #[arg(long)]
        json: bool,
    },

    /// Show the change timeline of a node
    History {
        #[arg(value_name = "NODE_ID")]
        id: String,

        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Manage graph snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommand,
    },
}

#[derive(Subcommand)]
enum SnapshotCommand {
    /// Capture the current graph
    Create {
        #[arg(long)]
        label: Option<String>,
    },
    /// List snapshots, newest first
    List {
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
    /// Compare two snapshots
    Diff {
        from: String,
        to: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete snapshots outside the retention limits
    Prune {
        #[arg(long)]
        max_snapshots: Option<usize>,
        #[arg(long)]
        max_age_days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so --json output stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let graph = commands::open_graph(&paths::resolve(cli.data_dir)).await?;

    match cli.command {
        Commands::Sync { adapters, all, due } => commands::sync::run(&graph, adapters, all, due).await,
        Commands::Stats { json } => commands::stats::run(&graph, json).await,
        Commands::Nodes {
            provider,
            resource_type,
            status,
            tags,
            limit,
            cursor,
            json,
        } => {
            let args = commands::nodes::NodeArgs {
                provider,
                resource_type,
                status,
                tags,
                limit,
                cursor,
                json,
            };
            commands::nodes::run(&graph, args).await
        }
        Commands::Neighbors {
            id,
            depth,
            direction,
            json,
        } => commands::neighbors::run(&graph, &id, depth, &direction, json).await,
        Commands::History { id, limit } => commands::history::run(&graph, &id, limit).await,
        Commands::Snapshot { command } => match command {
            SnapshotCommand::Create { label } => commands::snapshot::create(&graph, label.as_deref()).await,
            SnapshotCommand::List { limit } => commands::snapshot::list(&graph, limit).await,
            SnapshotCommand::Diff { from, to, json } => commands::snapshot::diff(&graph, &from, &to, json).await,
            SnapshotCommand::Prune {
                max_snapshots,
                max_age_days,
            } => commands::snapshot::prune(&graph, max_snapshots, max_age_days).await,
        },
    }
}
