//! The single entry point every caller uses to reconcile the forum and dashboard.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

use super::{
    dashboard::DashboardService,
    forum_sync::{ForumSyncService, SyncReport},
};

#[async_trait]
pub trait TriggerSync: Send + Sync {
    /// Run a forum pass and refresh the dashboard. Failures are logged, never returned.
    async fn trigger_sync(&self);
}

#[derive(Clone)]
pub struct SyncTrigger {
    forum: Arc<ForumSyncService>,
    dashboard: Option<Arc<DashboardService>>,
}

impl SyncTrigger {
    pub fn new(forum: Arc<ForumSyncService>, dashboard: Option<Arc<DashboardService>>) -> Self {
        Self { forum, dashboard }
    }

    pub fn forum(&self) -> &Arc<ForumSyncService> {
        &self.forum
    }

    /// Like [`TriggerSync::trigger_sync`] but hands back the forum report.
    pub async fn run_once(&self) -> Option<SyncReport> {
        let report = match self.forum.sync_from_store().await {
            Ok(report) => Some(report),
            Err(err) => {
                tracing::warn!(error = %err, "Forum sync pass failed");
                None
            }
        };

        if let Some(dashboard) = &self.dashboard
            && let Err(err) = dashboard.update_dashboard().await
        {
            tracing::warn!(error = %err, "Failed to update dashboard");
        }
        report
    }

    /// Run a pass every `interval` until `shutdown` flips to true. Ticks missed
    /// while a slow pass runs are skipped rather than bunched up.
    pub fn spawn_periodic(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let trigger = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_secs = interval.as_secs(), "Starting periodic task sync");

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        trigger.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Periodic task sync stopped");
        })
    }
}

#[async_trait]
impl TriggerSync for SyncTrigger {
    async fn trigger_sync(&self) {
        self.run_once().await;
    }
}
