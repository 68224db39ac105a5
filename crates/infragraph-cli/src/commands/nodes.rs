use anyhow::{anyhow, Result};
use console::style;
use infragraph_core::InfraGraph;
use infragraph_graph::{CloudProvider, NodeFilter, NodeStatus, PageOptions, ResourceType};

use crate::commands::parse_tag;
use crate::ui;

pub struct NodeArgs {
    pub provider: Option<String>,
    pub resource_type: Option<String>,
    pub status: Option<String>,
    pub tags: Vec<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub json: bool,
}

impl NodeArgs {
    fn filter(&self) -> Result<NodeFilter> {
        let mut filter = NodeFilter::new();
        if let Some(raw) = &self.provider {
            let provider = CloudProvider::parse(raw).ok_or_else(|| anyhow!("Unknown provider: {}", raw))?;
            filter = filter.provider(provider);
        }
        if let Some(raw) = &self.resource_type {
            let resource_type = ResourceType::parse(raw).ok_or_else(|| anyhow!("Unknown resource type: {}", raw))?;
            filter = filter.resource_type(resource_type);
        }
        if let Some(raw) = &self.status {
            let status = NodeStatus::parse(raw).ok_or_else(|| anyhow!("Unknown status: {}", raw))?;
            filter = filter.status(status);
        }
        for raw in &self.tags {
            let (key, value) = parse_tag(raw)?;
            filter = filter.tag(key, value);
        }
        Ok(filter)
    }
}

pub async fn run(graph: &InfraGraph, args: NodeArgs) -> Result<()> {
    let filter = args.filter()?;
    let page = graph
        .storage
        .query_nodes_paginated(
            &filter,
            &PageOptions {
                limit: args.limit,
                cursor: args.cursor.clone(),
            },
        )
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    if page.items.is_empty() {
        ui::info("No matching nodes.");
        return Ok(());
    }

    for node in &page.items {
        let cost = node.cost_monthly.map(ui::cost).unwrap_or_default();
        println!(
            "  {:<32} {:<12} {:<48} {}",
            node.name,
            style(node.status.as_str()).cyan(),
            ui::dim(&node.id),
            cost
        );
    }
    println!();
    ui::info(&format!("{} of {} nodes", page.items.len(), page.total_count));
    if let Some(cursor) = &page.next_cursor {
        ui::info(&format!("next page: --cursor {}", cursor));
    }
    Ok(())
}
