use anyhow::Result;
use console::style;
use infragraph_core::{InfraGraph, RetentionConfig};
use infragraph_graph::{SnapshotFilter, SnapshotTrigger};

use crate::commands::short_time;
use crate::ui;

pub async fn create(graph: &InfraGraph, label: Option<&str>) -> Result<()> {
    let snapshot = graph
        .snapshots
        .create_snapshot(graph.storage.as_ref(), SnapshotTrigger::Manual, label, None)
        .await?;
    ui::success(&format!(
        "Snapshot {} ({} nodes, {} edges, {})",
        snapshot.id,
        snapshot.node_count,
        snapshot.edge_count,
        ui::cost(snapshot.total_cost_monthly)
    ));
    Ok(())
}

pub async fn list(graph: &InfraGraph, limit: Option<usize>) -> Result<()> {
    let snapshots = graph
        .snapshots
        .list_snapshots(&SnapshotFilter {
            limit,
            ..SnapshotFilter::default()
        })
        .await?;

    if snapshots.is_empty() {
        ui::info("No snapshots yet. Create one with:");
        println!("    infragraph snapshot create");
        return Ok(());
    }

    for snapshot in &snapshots {
        println!(
            "  {}  {}  {:<9} {:>6} nodes {:>6} edges  {}",
            snapshot.id,
            ui::dim(&short_time(&snapshot.created_at)),
            snapshot.trigger.as_str(),
            snapshot.node_count,
            snapshot.edge_count,
            snapshot.label.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn diff(graph: &InfraGraph, from: &str, to: &str, json: bool) -> Result<()> {
    let diff = graph.snapshots.diff_snapshots(from, to).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }

    if diff.is_empty() {
        ui::success("No differences.");
        return Ok(());
    }

    for node in &diff.added_nodes {
        println!("  {} {}", style("+").green(), node.id);
    }
    for node in &diff.removed_nodes {
        println!("  {} {}", style("-").red(), node.id);
    }
    for change in &diff.changed_nodes {
        println!("  {} {}", style("~").yellow(), change.node_id);
        for field in &change.fields {
            ui::info(&format!(
                "    {}: {} -> {}",
                field.field,
                field.previous.as_deref().unwrap_or("-"),
                field.current.as_deref().unwrap_or("-")
            ));
        }
    }
    for edge in &diff.added_edges {
        println!("  {} {}", style("+").green(), edge.id);
    }
    for edge in &diff.removed_edges {
        println!("  {} {}", style("-").red(), edge.id);
    }
    println!();
    ui::field("cost change", ui::cost_delta(diff.cost_delta));
    Ok(())
}

/// Apply the given limits, falling back to the configured retention.
pub async fn prune(graph: &InfraGraph, max_snapshots: Option<usize>, max_age_days: Option<i64>) -> Result<()> {
    let policy = if max_snapshots.is_none() && max_age_days.is_none() {
        graph.config.retention.policy()
    } else {
        RetentionConfig {
            max_snapshots,
            max_age_days,
        }
        .policy()
    };

    if policy.is_unbounded() {
        ui::info("No retention limits set; nothing to prune.");
        return Ok(());
    }

    let deleted = graph.snapshots.prune_snapshots(&policy).await?;
    ui::success(&format!("Pruned {} snapshots", deleted));
    Ok(())
}
