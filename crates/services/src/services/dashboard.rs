use std::sync::Arc;

use db::{
    DbError, MetadataStore, RetryPolicy, TaskStatus, TaskStore, models::task::Task,
    with_store_retry,
};
use serde_json::Value;
use thiserror::Error;

use super::surface::{ChannelId, MessageId, MessageSurface, SurfaceError};

pub const DASHBOARD_MESSAGE_KEY: &str = "dashboard_message_id";

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DashboardSnapshot {
    pub total: usize,
    pub to_do: usize,
    pub in_progress: usize,
    pub complete: usize,
}

impl DashboardSnapshot {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut snapshot = DashboardSnapshot {
            total: tasks.len(),
            ..Default::default()
        };
        for task in tasks {
            match task.status {
                TaskStatus::ToDo => snapshot.to_do += 1,
                TaskStatus::InProgress => snapshot.in_progress += 1,
                TaskStatus::Complete => snapshot.complete += 1,
            }
        }
        snapshot
    }

    pub fn render(&self) -> String {
        [
            "**📊 Task Master - Central Dashboard**".to_string(),
            "High-level sync and task status overview.".to_string(),
            String::new(),
            "**Sync Status:** ✅ Online".to_string(),
            format!("**Total Tasks:** {}", self.total),
            format!("**To Do:** {}", self.to_do),
            format!("**In Progress:** {}", self.in_progress),
            format!("**Complete:** {}", self.complete),
            String::new(),
            "*Dashboard is bot-managed and read-only.*".to_string(),
        ]
        .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardUpdate {
    Edited(MessageId),
    Posted(MessageId),
}

/// Keeps one rollup message current, editing it in place while it exists.
pub struct DashboardService {
    tasks: Arc<dyn TaskStore>,
    metadata: Arc<dyn MetadataStore>,
    surface: Arc<dyn MessageSurface>,
    channel: ChannelId,
    retry: RetryPolicy,
}

impl DashboardService {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        metadata: Arc<dyn MetadataStore>,
        surface: Arc<dyn MessageSurface>,
        channel: ChannelId,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tasks,
            metadata,
            surface,
            channel,
            retry,
        }
    }

    pub async fn update_dashboard(&self) -> Result<DashboardUpdate, DashboardError> {
        let tasks = with_store_retry(&self.retry, || self.tasks.get_all()).await?;
        let content = DashboardSnapshot::from_tasks(&tasks).render();

        if let Some(message) = self.stored_message_id().await? {
            match self
                .surface
                .edit_channel_message(self.channel, message, &content)
                .await
            {
                Ok(()) => return Ok(DashboardUpdate::Edited(message)),
                Err(SurfaceError::NotFound | SurfaceError::PermissionDenied(_)) => {
                    tracing::info!(message_id = %message, "Dashboard message is gone, posting a new one");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let message = self
            .surface
            .send_channel_message(self.channel, &content)
            .await?;
        let value = Value::String(message.to_string());
        with_store_retry(&self.retry, || {
            self.metadata.set_blob(DASHBOARD_MESSAGE_KEY, &value)
        })
        .await?;
        tracing::info!(message_id = %message, "Posted dashboard message");
        Ok(DashboardUpdate::Posted(message))
    }

    async fn stored_message_id(&self) -> Result<Option<MessageId>, DbError> {
        let value =
            with_store_retry(&self.retry, || self.metadata.get_blob(DASHBOARD_MESSAGE_KEY)).await?;
        Ok(value.and_then(|value| match serde_json::from_value::<MessageId>(value) {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(error = %err, "Ignoring unreadable dashboard message id");
                None
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use db::{DBService, models::task::{CreateTask, UpdateTask}};

    use super::*;
    use crate::test_support::{FakeSurface, SurfaceCall};

    const CHANNEL: ChannelId = ChannelId(77);

    async fn setup() -> (Arc<DBService>, Arc<FakeSurface>, DashboardService) {
        let db = Arc::new(DBService::new_in_memory().await.unwrap());
        let surface = Arc::new(FakeSurface::new(ChannelId(1)));
        let dashboard = DashboardService::new(
            db.clone(),
            db.clone(),
            surface.clone(),
            CHANNEL,
            RetryPolicy::no_retry(),
        );
        (db, surface, dashboard)
    }

    #[test]
    fn snapshot_counts_each_status() {
        let mut tasks: Vec<Task> = ["a", "b", "c", "d"]
            .iter()
            .enumerate()
            .map(|(i, name)| Task::new(CreateTask::from_name(*name), i as i64))
            .collect();
        tasks[1].status = TaskStatus::InProgress;
        tasks[2].status = TaskStatus::Complete;
        tasks[3].status = TaskStatus::Complete;

        let snapshot = DashboardSnapshot::from_tasks(&tasks);
        assert_eq!(
            snapshot,
            DashboardSnapshot {
                total: 4,
                to_do: 1,
                in_progress: 1,
                complete: 2
            }
        );
        let text = snapshot.render();
        assert!(text.contains("**Total Tasks:** 4"));
        assert!(text.contains("**Complete:** 2"));
        assert!(text.ends_with("*Dashboard is bot-managed and read-only.*"));
    }

    #[tokio::test]
    async fn first_update_posts_then_edits_in_place() {
        let (db, surface, dashboard) = setup().await;
        db.create(CreateTask::from_name("one")).await.unwrap();

        let DashboardUpdate::Posted(id) = dashboard.update_dashboard().await.unwrap() else {
            panic!("expected a new dashboard message");
        };
        assert_eq!(
            db.get_blob(DASHBOARD_MESSAGE_KEY).await.unwrap(),
            Some(Value::String(id.to_string()))
        );

        let task = db.create(CreateTask::from_name("two")).await.unwrap();
        db.update_fields(task.id, UpdateTask::status(TaskStatus::Complete))
            .await
            .unwrap();
        assert_eq!(
            dashboard.update_dashboard().await.unwrap(),
            DashboardUpdate::Edited(id)
        );
        let content = surface.message(id).unwrap();
        assert!(content.contains("**Total Tasks:** 2"));
        assert!(content.contains("**Complete:** 1"));
    }

    #[tokio::test]
    async fn deleted_message_is_replaced_and_new_id_persisted() {
        let (db, surface, dashboard) = setup().await;
        let DashboardUpdate::Posted(first) = dashboard.update_dashboard().await.unwrap() else {
            panic!("expected a new dashboard message");
        };

        surface.delete_message_externally(first);
        let DashboardUpdate::Posted(second) = dashboard.update_dashboard().await.unwrap() else {
            panic!("expected the dashboard to be reposted");
        };
        assert_ne!(first, second);
        assert_eq!(
            db.get_blob(DASHBOARD_MESSAGE_KEY).await.unwrap(),
            Some(Value::String(second.to_string()))
        );
        assert_eq!(
            surface
                .calls()
                .iter()
                .filter(|c| matches!(c, SurfaceCall::SendChannelMessage(_)))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn numeric_ids_from_older_releases_are_honoured() {
        let (db, surface, dashboard) = setup().await;
        let posted = surface.send_channel_message(CHANNEL, "old").await.unwrap();
        db.set_blob(DASHBOARD_MESSAGE_KEY, &Value::from(posted.0))
            .await
            .unwrap();

        assert_eq!(
            dashboard.update_dashboard().await.unwrap(),
            DashboardUpdate::Edited(posted)
        );
    }
}
