//! Task mutations shared by every front-end. Each one asks for a sync before
//! returning so the forum reflects the change by the time the caller replies.

use std::{collections::HashSet, sync::Arc};

use db::{
    DbError, RetryPolicy, TaskStatus, TaskStore,
    models::{
        subtask::{self, SubtaskError, SubtaskFields, UpsertOutcome},
        task::{CreateTask, Task, UpdateTask},
    },
    validation, with_store_retry,
};
use thiserror::Error;

use super::trigger::TriggerSync;

#[derive(Debug, Error)]
pub enum TaskServiceError {
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Subtask(#[from] SubtaskError),
    #[error("Task not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    trigger: Arc<dyn TriggerSync>,
    retry: RetryPolicy,
}

impl TaskService {
    pub fn new(store: Arc<dyn TaskStore>, trigger: Arc<dyn TriggerSync>, retry: RetryPolicy) -> Self {
        Self {
            store,
            trigger,
            retry,
        }
    }

    pub async fn list(&self) -> Result<Vec<Task>, TaskServiceError> {
        Ok(with_store_retry(&self.retry, || self.store.get_all()).await?)
    }

    pub async fn get(&self, key: &str) -> Result<Task, TaskServiceError> {
        with_store_retry(&self.retry, || self.store.get_by_key(key))
            .await?
            .ok_or_else(|| TaskServiceError::NotFound(key.to_string()))
    }

    pub async fn create(&self, data: CreateTask) -> Result<Task, TaskServiceError> {
        validate_name(&data.name)?;
        validate_url(&data.url)?;
        let task = with_store_retry(&self.retry, || self.store.create(data.clone())).await?;
        tracing::info!(task_id = %task.id, name = %task.name, "Created task");
        self.trigger.trigger_sync().await;
        Ok(task)
    }

    pub async fn update(&self, key: &str, update: UpdateTask) -> Result<Task, TaskServiceError> {
        if let Some(name) = &update.name {
            validate_name(name)?;
        }
        if let Some(url) = &update.url {
            validate_url(url)?;
        }
        let task = self.get(key).await?;
        let updated = self.write(task.id, update).await?;
        self.trigger.trigger_sync().await;
        Ok(updated)
    }

    pub async fn set_status(&self, key: &str, status: TaskStatus) -> Result<Task, TaskServiceError> {
        let updated = self.update(key, UpdateTask::status(status)).await?;
        tracing::info!(task_id = %updated.id, status = %status, "Updated task status");
        Ok(updated)
    }

    pub async fn rename(&self, key: &str, name: &str) -> Result<Task, TaskServiceError> {
        self.update(key, UpdateTask::name(name)).await
    }

    /// Set the deadline from user text; blank input clears it.
    pub async fn set_deadline(&self, key: &str, input: &str) -> Result<Task, TaskServiceError> {
        let deadline = if input.trim().is_empty() {
            None
        } else {
            Some(validation::parse_deadline(input).ok_or_else(|| {
                TaskServiceError::Validation(format!("'{}' is not a recognised deadline", input.trim()))
            })?)
        };
        self.update(
            key,
            UpdateTask {
                deadline: Some(deadline),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete(&self, key: &str) -> Result<(), TaskServiceError> {
        let removed = with_store_retry(&self.retry, || self.store.delete_by_key(key)).await?;
        if !removed {
            return Err(TaskServiceError::NotFound(key.to_string()));
        }
        tracing::info!(task_key = key, "Deleted task");
        self.trigger.trigger_sync().await;
        Ok(())
    }

    /// Reorder tasks within one priority group. The listed tasks keep the
    /// positions the group already occupies, filled in the given order.
    pub async fn reorder(&self, keys: &[String]) -> Result<Vec<Task>, TaskServiceError> {
        let Some(first) = keys.first() else {
            return Err(TaskServiceError::Validation("Nothing to reorder".to_string()));
        };
        let mut tasks = self.list().await?;
        tasks.sort_by_key(|task| task.order);

        let mut requested: Vec<Task> = Vec::with_capacity(keys.len());
        let mut seen = HashSet::new();
        for key in keys {
            let task = tasks
                .iter()
                .find(|task| task.key() == *key || task.legacy_key.as_deref() == Some(key.as_str()))
                .ok_or_else(|| TaskServiceError::NotFound(key.clone()))?;
            if !seen.insert(task.id) {
                return Err(TaskServiceError::Validation(format!("'{key}' listed twice")));
            }
            requested.push(task.clone());
        }

        let group = requested[0].priority;
        if requested.iter().any(|task| task.priority != group) {
            return Err(TaskServiceError::Validation(
                "Cannot reorder tasks across different priority groups".to_string(),
            ));
        }

        let mut replacements = requested.into_iter();
        let reordered: Vec<Task> = tasks
            .into_iter()
            .map(|task| {
                if seen.contains(&task.id) {
                    replacements.next().unwrap_or(task)
                } else {
                    task
                }
            })
            .enumerate()
            .map(|(index, mut task)| {
                task.order = index as i64;
                task
            })
            .collect();

        with_store_retry(&self.retry, || self.store.save_all(&reordered)).await?;
        tracing::info!(first = %first, count = keys.len(), "Reordered tasks");
        self.trigger.trigger_sync().await;
        Ok(reordered)
    }

    /// Add a subtask under the next unused id.
    pub async fn add_subtask(
        &self,
        key: &str,
        fields: SubtaskFields,
    ) -> Result<(Task, u32), TaskServiceError> {
        let task = self.get(key).await?;
        let mut subtasks = task.subtasks.clone();
        let id = subtask::add(&mut subtasks, fields, task.subtask_high_water())?;
        let updated = self
            .write(task.id, UpdateTask::subtasks(subtasks, id.saturating_add(1)))
            .await?;
        tracing::info!(task_id = %task.id, subtask_id = id, "Added sub-task");
        self.trigger.trigger_sync().await;
        Ok((updated, id))
    }

    /// Edit subtask `#id` or create it under exactly that id.
    pub async fn upsert_subtask(
        &self,
        key: &str,
        id: u32,
        fields: SubtaskFields,
    ) -> Result<(Task, UpsertOutcome), TaskServiceError> {
        let task = self.get(key).await?;
        let mut subtasks = task.subtasks.clone();
        let outcome = subtask::upsert(&mut subtasks, id, fields)?;
        let high_water = task.subtask_high_water().max(id.saturating_add(1));
        let updated = self
            .write(task.id, UpdateTask::subtasks(subtasks, high_water))
            .await?;
        tracing::info!(task_id = %task.id, subtask_id = id, ?outcome, "Saved sub-task");
        self.trigger.trigger_sync().await;
        Ok((updated, outcome))
    }

    pub async fn toggle_subtask(&self, key: &str, id: u32) -> Result<(Task, bool), TaskServiceError> {
        let task = self.get(key).await?;
        let mut subtasks = task.subtasks.clone();
        let completed = subtask::toggle(&mut subtasks, id)?;
        let updated = self
            .write(task.id, UpdateTask::subtasks(subtasks, task.subtask_high_water()))
            .await?;
        self.trigger.trigger_sync().await;
        Ok((updated, completed))
    }

    pub async fn delete_subtask(&self, key: &str, id: u32) -> Result<Task, TaskServiceError> {
        let task = self.get(key).await?;
        let mut subtasks = task.subtasks.clone();
        subtask::delete(&mut subtasks, id)?;
        // Keep the high-water mark so the deleted id is never handed out again.
        let updated = self
            .write(task.id, UpdateTask::subtasks(subtasks, task.subtask_high_water()))
            .await?;
        tracing::info!(task_id = %task.id, subtask_id = id, "Deleted sub-task");
        self.trigger.trigger_sync().await;
        Ok(updated)
    }

    async fn write(&self, id: uuid::Uuid, update: UpdateTask) -> Result<Task, TaskServiceError> {
        Ok(with_store_retry(&self.retry, || self.store.update_fields(id, update.clone())).await?)
    }
}

fn validate_name(name: &str) -> Result<(), TaskServiceError> {
    if name.trim().is_empty() {
        return Err(TaskServiceError::Validation("Task name is required".to_string()));
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<(), TaskServiceError> {
    if !validation::is_valid_url(url) {
        return Err(TaskServiceError::Validation(format!(
            "'{}' is not a valid http(s) URL",
            url.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use db::{DBService, TaskPriority};

    use super::*;
    use crate::{
        services::{
            forum_sync::{ForumSyncService, SyncOptions},
            render,
            surface::ChannelId,
            trigger::SyncTrigger,
        },
        test_support::FakeSurface,
    };

    #[derive(Default)]
    struct CountingTrigger {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TriggerSync for CountingTrigger {
        async fn trigger_sync(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn service() -> (TaskService, Arc<CountingTrigger>) {
        let db = Arc::new(DBService::new_in_memory().await.unwrap());
        let trigger = Arc::new(CountingTrigger::default());
        (
            TaskService::new(db, trigger.clone(), RetryPolicy::no_retry()),
            trigger,
        )
    }

    fn fields(name: &str) -> SubtaskFields {
        SubtaskFields {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn every_mutation_triggers_a_sync() {
        let (service, trigger) = service().await;
        let task = service.create(CreateTask::from_name("a")).await.unwrap();
        let key = task.key();
        service.set_status(&key, TaskStatus::InProgress).await.unwrap();
        service.rename(&key, "b").await.unwrap();
        service.add_subtask(&key, fields("s")).await.unwrap();
        service.toggle_subtask(&key, 1).await.unwrap();
        service.delete_subtask(&key, 1).await.unwrap();
        service.delete(&key).await.unwrap();
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn failed_validation_does_not_trigger() {
        let (service, trigger) = service().await;
        let err = service.create(CreateTask::from_name("  ")).await.unwrap_err();
        assert!(matches!(err, TaskServiceError::Validation(_)));
        let err = service.delete("missing").await.unwrap_err();
        assert!(matches!(err, TaskServiceError::NotFound(_)));
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deleted_subtask_ids_are_never_reused() {
        let (service, _) = service().await;
        let key = service.create(CreateTask::from_name("t")).await.unwrap().key();
        let (_, one) = service.add_subtask(&key, fields("one")).await.unwrap();
        let (_, two) = service.add_subtask(&key, fields("two")).await.unwrap();
        service.delete_subtask(&key, two).await.unwrap();
        let (task, three) = service.add_subtask(&key, fields("three")).await.unwrap();

        assert_eq!((one, two, three), (1, 2, 3));
        assert_eq!(
            task.subtasks.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[tokio::test]
    async fn upsert_creates_the_requested_id_and_keeps_the_rest() {
        let (service, _) = service().await;
        let key = service.create(CreateTask::from_name("t")).await.unwrap().key();
        for name in ["one", "two", "three"] {
            service.add_subtask(&key, fields(name)).await.unwrap();
        }

        let (task, outcome) = service
            .upsert_subtask(&key, 5, fields("Draft outline"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);
        assert_eq!(
            task.subtasks
                .iter()
                .map(|s| (s.id, s.name.as_str()))
                .collect::<Vec<_>>(),
            vec![(1, "one"), (2, "two"), (3, "three"), (5, "Draft outline")]
        );

        let (task, next) = service.add_subtask(&key, fields("after")).await.unwrap();
        assert_eq!(next, 6);
        assert_eq!(service.get(&key).await.unwrap().subtasks, task.subtasks);
    }

    #[tokio::test]
    async fn largest_subtask_ids_are_refused_without_side_effects() {
        let (service, trigger) = service().await;
        let key = service.create(CreateTask::from_name("t")).await.unwrap().key();
        service.add_subtask(&key, fields("one")).await.unwrap();
        let calls_before = trigger.calls.load(Ordering::SeqCst);

        assert!(subtask::parse_subtask_id("#4294967295").is_err());
        let err = service
            .upsert_subtask(&key, u32::MAX, fields("x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TaskServiceError::Subtask(SubtaskError::Validation(_))
        ));
        assert_eq!(trigger.calls.load(Ordering::SeqCst), calls_before);

        let (task, _) = service
            .upsert_subtask(&key, subtask::MAX_SUBTASK_ID, fields("last"))
            .await
            .unwrap();
        assert_eq!(task.next_subtask_id, subtask::MAX_SUBTASK_ID + 1);
        let err = service.add_subtask(&key, fields("more")).await.unwrap_err();
        assert!(matches!(
            err,
            TaskServiceError::Subtask(SubtaskError::Validation(_))
        ));
        assert_eq!(
            service.get(&key).await.unwrap().subtasks.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![1, subtask::MAX_SUBTASK_ID]
        );
    }

    #[tokio::test]
    async fn missing_subtask_surfaces_not_found() {
        let (service, _) = service().await;
        let key = service.create(CreateTask::from_name("t")).await.unwrap().key();
        let err = service.toggle_subtask(&key, 9).await.unwrap_err();
        assert!(matches!(
            err,
            TaskServiceError::Subtask(SubtaskError::NotFound(9))
        ));
    }

    #[tokio::test]
    async fn deadlines_are_parsed_and_cleared() {
        let (service, _) = service().await;
        let key = service.create(CreateTask::from_name("t")).await.unwrap().key();
        let task = service.set_deadline(&key, "14-03-2025 03:30 PM").await.unwrap();
        assert_eq!(task.deadline_display().as_deref(), Some("14-03-2025 03:30 PM"));
        assert!(matches!(
            service.set_deadline(&key, "someday").await,
            Err(TaskServiceError::Validation(_))
        ));
        assert_eq!(service.set_deadline(&key, "").await.unwrap().deadline, None);
    }

    #[tokio::test]
    async fn reorder_stays_within_a_priority_group() {
        let (service, _) = service().await;
        let mut keys = Vec::new();
        for (name, priority) in [
            ("a", TaskPriority::Important),
            ("x", TaskPriority::Default),
            ("b", TaskPriority::Important),
            ("c", TaskPriority::Important),
        ] {
            let task = service
                .create(CreateTask {
                    priority,
                    ..CreateTask::from_name(name)
                })
                .await
                .unwrap();
            keys.push(task.key());
        }

        let reordered = service
            .reorder(&[keys[3].clone(), keys[0].clone()])
            .await
            .unwrap();
        assert_eq!(
            reordered
                .iter()
                .map(|t| (t.name.as_str(), t.order))
                .collect::<Vec<_>>(),
            vec![("c", 0), ("x", 1), ("b", 2), ("a", 3)]
        );

        let err = service
            .reorder(&[keys[0].clone(), keys[1].clone()])
            .await
            .unwrap_err();
        assert!(matches!(err, TaskServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn create_is_visible_on_the_forum_before_returning() {
        let db = Arc::new(DBService::new_in_memory().await.unwrap());
        let surface = Arc::new(FakeSurface::new(ChannelId(1)));
        let forum = Arc::new(ForumSyncService::new(
            db.clone(),
            db.clone(),
            surface.clone(),
            ChannelId(1),
            SyncOptions::default(),
        ));
        let trigger = Arc::new(SyncTrigger::new(forum, None));
        let service = TaskService::new(db, trigger, RetryPolicy::no_retry());

        let task = service
            .create(CreateTask {
                priority: TaskPriority::Important,
                ..CreateTask::from_name("Write report")
            })
            .await
            .unwrap();

        let open = surface.open_threads();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].handle.title, render::thread_title(&task));

        service.set_status(&task.key(), TaskStatus::Complete).await.unwrap();
        assert!(surface.open_threads().is_empty());
    }
}
