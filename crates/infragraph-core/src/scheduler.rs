//! Interval-based sync scheduler.
//!
//! An adapter is due when its last sync record completed at least one
//! interval ago, or when it has never synced. On-demand requests jump the
//! queue. The scheduler only decides; the caller runs the syncs and reports
//! back with `complete_sync` / `fail_sync`.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use infragraph_graph::{GraphStorage, SyncRecord};
use tracing::{debug, info, warn};

use crate::config::InfraConfig;

/// Why a sync was queued. Orders by priority, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncReason {
    /// Requested by an operator.
    OnDemand,
    NeverSynced,
    Stale,
}

/// Configuration for the sync scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Age after which a sync record is stale (default: 1 hour).
    pub interval: Duration,

    /// Maximum concurrent syncs.
    pub max_concurrent: usize,

    /// Whether to schedule automatically at all.
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            max_concurrent: 2,
            enabled: true,
        }
    }
}

impl From<&InfraConfig> for SchedulerConfig {
    fn from(config: &InfraConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.sync.interval_minutes.saturating_mul(60)),
            ..Self::default()
        }
    }
}

/// A scheduled sync task.
#[derive(Debug, Clone)]
pub struct ScheduledSync {
    pub adapter: String,
    pub reason: SyncReason,
    pub scheduled_at: DateTime<Utc>,
}

impl ScheduledSync {
    pub fn new(adapter: &str, reason: SyncReason) -> Self {
        Self {
            adapter: adapter.to_string(),
            reason,
            scheduled_at: Utc::now(),
        }
    }
}

/// Whether `last` is old enough to sync again at `now`.
pub fn is_due(last: Option<&SyncRecord>, interval: Duration, now: DateTime<Utc>) -> bool {
    let Some(last) = last else {
        return true;
    };
    match chrono::Duration::from_std(interval) {
        Ok(interval) => now - last.completed_at >= interval,
        // An interval too large to represent never elapses
        Err(_) => false,
    }
}

pub struct SyncScheduler {
    config: SchedulerConfig,

    /// Pending syncs, most urgent first.
    pending: Vec<ScheduledSync>,

    /// Adapters that are currently syncing.
    in_progress: HashSet<String>,
}

impl SyncScheduler {
    /// Create a new scheduler with default configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with custom configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
            in_progress: HashSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Queue every adapter whose last sync is stale.
    ///
    /// Returns only the syncs newly queued by this call.
    pub async fn schedule_due(&mut self, storage: &dyn GraphStorage, adapters: &[&str]) -> Result<Vec<ScheduledSync>> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut scheduled = Vec::new();
        for &adapter in adapters {
            let last = storage.get_last_sync_record(Some(adapter)).await?;
            if !is_due(last.as_ref(), self.config.interval, now) {
                debug!(adapter, "sync not due");
                continue;
            }
            let reason = if last.is_some() {
                SyncReason::Stale
            } else {
                SyncReason::NeverSynced
            };
            let sync = ScheduledSync::new(adapter, reason);
            if !self.is_duplicate(&sync) {
                info!(adapter, ?reason, "queueing sync");
                scheduled.push(sync.clone());
                self.pending.push(sync);
            }
        }

        self.pending.sort_by_key(|s| s.reason);
        Ok(scheduled)
    }

    fn is_duplicate(&self, sync: &ScheduledSync) -> bool {
        self.in_progress.contains(&sync.adapter) || self.pending.iter().any(|p| p.adapter == sync.adapter)
    }

    /// Get the next sync task to execute.
    ///
    /// Returns None if:
    /// - No pending syncs
    /// - Max concurrent syncs reached
    /// - Every pending adapter is already syncing
    pub fn next_sync(&mut self) -> Option<ScheduledSync> {
        if self.in_progress.len() >= self.config.max_concurrent {
            debug!("max concurrent syncs reached");
            return None;
        }

        let idx = self
            .pending
            .iter()
            .position(|s| !self.in_progress.contains(&s.adapter))?;

        let sync = self.pending.remove(idx);
        self.in_progress.insert(sync.adapter.clone());
        Some(sync)
    }

    pub fn complete_sync(&mut self, adapter: &str) {
        self.in_progress.remove(adapter);
        info!(adapter, "sync completed");
    }

    pub fn fail_sync(&mut self, adapter: &str) {
        self.in_progress.remove(adapter);
        warn!(adapter, "sync failed");
    }

    /// Queue an operator-requested sync ahead of everything else.
    ///
    /// Replaces a pending scheduled sync for the same adapter.
    pub fn queue_on_demand(&mut self, adapter: &str) {
        self.pending.retain(|s| s.adapter != adapter);
        info!(adapter, "queueing on-demand sync");
        self.pending.insert(0, ScheduledSync::new(adapter, SyncReason::OnDemand));
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn in_progress_count(&self) -> usize {
        self.in_progress.len()
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut in_progress: Vec<String> = self.in_progress.iter().cloned().collect();
        in_progress.sort();
        SchedulerStats {
            pending: self.pending.iter().map(|s| s.adapter.clone()).collect(),
            in_progress,
        }
    }
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of scheduler state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Pending adapters in queue order.
    pub pending: Vec<String>,
    pub in_progress: Vec<String>,
}
