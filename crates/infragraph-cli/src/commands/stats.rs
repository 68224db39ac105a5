use anyhow::Result;
use infragraph_core::InfraGraph;

use crate::commands::short_time;
use crate::ui;

pub async fn run(graph: &InfraGraph, json: bool) -> Result<()> {
    let stats = graph.storage.get_stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    ui::header("Infragraph");
    ui::field("nodes", stats.total_nodes);
    ui::field("edges", stats.total_edges);
    ui::field("groups", stats.total_groups);
    ui::field("changes", stats.total_changes);
    ui::field("monthly cost", ui::cost(stats.total_cost_monthly));
    ui::field(
        "last sync",
        stats.last_sync_at.as_ref().map(short_time).unwrap_or_else(|| "never".into()),
    );

    if !stats.nodes_by_provider.is_empty() {
        ui::header("By provider");
        for (provider, count) in &stats.nodes_by_provider {
            ui::field(provider, count);
        }
    }
    if !stats.nodes_by_resource_type.is_empty() {
        ui::header("By resource type");
        for (resource_type, count) in &stats.nodes_by_resource_type {
            ui::field(resource_type, count);
        }
    }
    if !stats.edges_by_relationship_type.is_empty() {
        ui::header("By relationship");
        for (relationship, count) in &stats.edges_by_relationship_type {
            ui::field(relationship, count);
        }
    }
    println!();
    Ok(())
}
