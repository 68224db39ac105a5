use anyhow::{anyhow, Result};
use infragraph_core::{DiscoverOptions, InfraGraph, SchedulerConfig, SyncOutcome, SyncScheduler};
use infragraph_graph::SyncStatus;

use crate::ui;

pub async fn run(graph: &InfraGraph, adapters: Vec<String>, all: bool, due: bool) -> Result<()> {
    let names: Vec<String> = if all || adapters.is_empty() {
        graph.registry.list_available().into_iter().map(str::to_string).collect()
    } else {
        for name in &adapters {
            if !graph.registry.is_available(name) {
                return Err(anyhow!("Unknown or disabled adapter: {}", name));
            }
        }
        adapters
    };

    if names.is_empty() {
        ui::info("No adapters configured. Declare one in infragraph.toml:");
        println!("    [adapters.prod-aws]");
        println!("    provider = \"aws\"");
        return Ok(());
    }

    let mut scheduler = SyncScheduler::with_config(SchedulerConfig {
        max_concurrent: 1,
        ..SchedulerConfig::from(&graph.config)
    });
    if due {
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        if scheduler.schedule_due(graph.storage.as_ref(), &refs).await?.is_empty() {
            ui::success("Everything is up to date.");
            return Ok(());
        }
    } else {
        for name in names.iter().rev() {
            scheduler.queue_on_demand(name);
        }
    }

    let options = DiscoverOptions::default();
    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    while let Some(next) = scheduler.next_sync() {
        let pb = ui::spinner(&format!("Syncing {}", next.adapter));
        match graph.sync_adapter(&next.adapter, &options).await {
            Ok(outcome) => {
                pb.finish_and_clear();
                report(&next.adapter, &outcome);
                scheduler.complete_sync(&next.adapter);
            }
            Err(e) => {
                pb.abandon_with_message("Failed");
                ui::error(&format!("{}: {:#}", next.adapter, e));
                scheduler.fail_sync(&next.adapter);
            }
        }
        if options.is_cancelled() {
            ui::warn("Cancelled.");
            break;
        }
    }

    Ok(())
}

fn report(adapter: &str, outcome: &SyncOutcome) {
    let record = &outcome.record;
    let summary = format!(
        "{}: {} nodes ({} new, {} updated, {} gone), {} edges ({} new) in {}ms",
        adapter,
        record.nodes_discovered,
        record.nodes_created,
        record.nodes_updated,
        record.nodes_disappeared,
        record.edges_discovered,
        record.edges_created,
        record.duration_ms,
    );
    match record.status {
        SyncStatus::Completed => ui::success(&summary),
        SyncStatus::Partial | SyncStatus::Cancelled => ui::warn(&format!("{} [{}]", summary, record.status.as_str())),
        SyncStatus::Failed => ui::error(&format!("{} [failed]", summary)),
    }

    for err in &record.errors {
        let region = err.region.as_deref().unwrap_or("-");
        ui::info(&format!("{} {} {}: {}", ui::dim("error"), err.resource_type, region, err.message));
    }
    if outcome.placeholders_created > 0 {
        ui::info(&format!("{} placeholder nodes for unresolved references", outcome.placeholders_created));
    }
    if let Some(diff) = &outcome.diff {
        ui::info(&format!(
            "since last snapshot: +{} -{} ~{} nodes, {}",
            diff.added_nodes.len(),
            diff.removed_nodes.len(),
            diff.changed_nodes.len(),
            ui::cost_delta(diff.cost_delta)
        ));
    }
    if outcome.snapshots_pruned > 0 {
        ui::info(&format!("pruned {} old snapshots", outcome.snapshots_pruned));
    }
}
