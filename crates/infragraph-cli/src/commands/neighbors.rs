use anyhow::{anyhow, Result};
use console::style;
use infragraph_core::InfraGraph;
use infragraph_graph::{TraversalDirection, MAX_TRAVERSAL_DEPTH};

use crate::ui;

pub async fn run(graph: &InfraGraph, id: &str, depth: usize, direction: &str, json: bool) -> Result<()> {
    let direction = TraversalDirection::parse(direction)
        .ok_or_else(|| anyhow!("Unknown direction: {}. Use downstream, upstream or both", direction))?;

    if graph.storage.get_node(id).await?.is_none() {
        return Err(anyhow!("No node with id {}", id));
    }
    let subgraph = graph.storage.get_neighbors(id, depth, direction, None).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&subgraph)?);
        return Ok(());
    }

    if depth > MAX_TRAVERSAL_DEPTH {
        ui::warn(&format!("depth capped at {}", MAX_TRAVERSAL_DEPTH));
    }
    ui::header(&format!("{} ({})", id, direction.as_str()));
    for node in &subgraph.nodes {
        let marker = if node.id == id { "*" } else { " " };
        println!(
            "  {} {:<32} {:<18} {}",
            marker,
            node.name,
            node.resource_type.as_str(),
            ui::dim(&node.id)
        );
    }
    println!();
    for edge in &subgraph.edges {
        println!(
            "  {} {} {} {}",
            edge.source_node_id,
            style(format!("-[{}]->", edge.relationship_type.as_str())).cyan(),
            edge.target_node_id,
            ui::dim(&format!("({:.2})", edge.confidence))
        );
    }
    println!();
    ui::info(&format!("{} nodes, {} edges", subgraph.nodes.len(), subgraph.edges.len()));
    Ok(())
}
