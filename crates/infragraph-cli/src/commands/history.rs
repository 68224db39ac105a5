use anyhow::Result;
use console::style;
use infragraph_core::InfraGraph;

use crate::commands::short_time;
use crate::ui;

pub async fn run(graph: &InfraGraph, id: &str, limit: usize) -> Result<()> {
    let timeline = graph.storage.get_node_timeline(id, limit).await?;
    let versions = graph.snapshots.get_node_history(id, limit).await?;

    if timeline.is_empty() && versions.is_empty() {
        ui::info(&format!("No history for {}", id));
        return Ok(());
    }

    ui::header(&format!("Changes to {}", id));
    for change in &timeline {
        let detail = match (&change.field, &change.previous_value, &change.new_value) {
            (Some(field), previous, current) => format!(
                "{}: {} -> {}",
                field,
                previous.as_deref().unwrap_or("-"),
                current.as_deref().unwrap_or("-")
            ),
            (None, _, _) => String::new(),
        };
        println!(
            "  {}  {:<18} {}  {}",
            ui::dim(&short_time(&change.detected_at)),
            style(change.change_type.as_str()).cyan(),
            detail,
            ui::dim(change.initiator.as_deref().unwrap_or(""))
        );
    }

    if !versions.is_empty() {
        ui::header("Snapshot versions");
        for version in &versions {
            println!(
                "  {}  {}  {}",
                ui::dim(&short_time(&version.captured_at)),
                version.node.status.as_str(),
                ui::dim(&version.snapshot_id)
            );
        }
    }
    println!();
    Ok(())
}
