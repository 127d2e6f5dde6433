use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteExecutor;
use uuid::Uuid;

pub use crate::types::{TaskPriority, TaskStatus};
use crate::{
    DbError, DbPool,
    models::subtask::{self, Subtask},
    validation,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Identity under the pre-UUID scheme (the task name). Kept so thread
    /// mappings recorded under it can be rehomed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_key: Option<String>,
    pub name: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, alias = "colour")]
    pub priority: TaskPriority,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub deadline: Option<NaiveDateTime>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default, deserialize_with = "subtask::deserialize_subtasks")]
    pub subtasks: Vec<Subtask>,
    /// High-water mark for automatically assigned subtask ids.
    #[serde(default)]
    pub next_subtask_id: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CreateTask {
    pub name: String,
    pub status: Option<TaskStatus>,
    pub priority: TaskPriority,
    pub owner: String,
    pub deadline: Option<NaiveDateTime>,
    pub description: String,
    pub url: String,
}

impl CreateTask {
    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateTask {
    pub name: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub owner: Option<String>,
    pub deadline: Option<Option<NaiveDateTime>>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub order: Option<i64>,
    pub subtasks: Option<Vec<Subtask>>,
    pub next_subtask_id: Option<u32>,
}

impl UpdateTask {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn description(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }

    pub fn subtasks(subtasks: Vec<Subtask>, next_subtask_id: u32) -> Self {
        Self {
            subtasks: Some(subtasks),
            next_subtask_id: Some(next_subtask_id),
            ..Default::default()
        }
    }
}

impl Task {
    pub fn new(data: CreateTask, order: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            legacy_key: None,
            name: data.name.trim().to_string(),
            status: data.status.unwrap_or_default(),
            priority: data.priority,
            owner: data.owner,
            deadline: data.deadline,
            description: data.description,
            url: data.url,
            order,
            subtasks: Vec::new(),
            next_subtask_id: 1,
        }
    }

    /// Key the task is mapped under everywhere outside the store.
    pub fn key(&self) -> String {
        self.id.to_string()
    }

    /// Identifiers earlier releases keyed this task by, most specific first.
    pub fn legacy_keys(&self) -> Vec<&str> {
        let key = self.key();
        let mut keys: Vec<&str> = Vec::new();
        for candidate in [self.legacy_key.as_deref(), Some(self.name.as_str())]
            .into_iter()
            .flatten()
        {
            if !candidate.is_empty() && candidate != key && !keys.contains(&candidate) {
                keys.push(candidate);
            }
        }
        keys
    }

    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::Complete
    }

    pub fn deadline_display(&self) -> Option<String> {
        self.deadline.as_ref().map(validation::format_deadline)
    }

    /// `(completed, total)` or `None` when the task has no subtasks.
    pub fn subtask_progress(&self) -> Option<(usize, usize)> {
        if self.subtasks.is_empty() {
            return None;
        }
        let completed = self.subtasks.iter().filter(|s| s.completed).count();
        Some((completed, self.subtasks.len()))
    }

    /// Effective high-water mark, tolerating rows written before it was tracked.
    pub fn subtask_high_water(&self) -> u32 {
        subtask::next_id(&self.subtasks, self.next_subtask_id)
    }

    pub fn apply(&mut self, update: UpdateTask) {
        if let Some(name) = update.name {
            self.name = name.trim().to_string();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(owner) = update.owner {
            self.owner = owner;
        }
        if let Some(deadline) = update.deadline {
            self.deadline = deadline;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(url) = update.url {
            self.url = url;
        }
        if let Some(order) = update.order {
            self.order = order;
        }
        if let Some(subtasks) = update.subtasks {
            self.subtasks = subtask::renormalize(subtasks);
        }
        if let Some(next_subtask_id) = update.next_subtask_id {
            self.next_subtask_id = next_subtask_id;
        }
        self.next_subtask_id = self.subtask_high_water();
    }

    fn decode(data: &str) -> Option<Self> {
        match serde_json::from_str::<Task>(data) {
            Ok(task) => Some(task),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping unreadable task row");
                None
            }
        }
    }

    pub async fn find_all(pool: &DbPool) -> Result<Vec<Self>, DbError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT data FROM tasks ORDER BY sort_order ASC, uuid ASC",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows.iter().filter_map(|data| Self::decode(data)).collect())
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, DbError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_scalar::<_, String>("SELECT data FROM tasks WHERE uuid = ?1")
            .bind(id.to_string())
            .fetch_optional(executor)
            .await?;
        Ok(row.as_deref().and_then(Self::decode))
    }

    /// Look a task up by UUID string or by its legacy key.
    pub async fn find_by_key(pool: &DbPool, key: &str) -> Result<Option<Self>, DbError> {
        let row = sqlx::query_scalar::<_, String>(
            "SELECT data FROM tasks WHERE uuid = ?1 OR legacy_key = ?1 ORDER BY uuid = ?1 DESC LIMIT 1",
        )
        .bind(key)
        .fetch_optional(pool)
        .await?;
        Ok(row.as_deref().and_then(Self::decode))
    }

    pub async fn create(pool: &DbPool, data: CreateTask) -> Result<Self, DbError> {
        let mut tx = pool.begin().await?;
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tasks")
            .fetch_one(&mut *tx)
            .await?;
        let task = Task::new(data, count);
        Self::write(&mut *tx, &task).await?;
        tx.commit().await?;
        Ok(task)
    }

    pub async fn update(pool: &DbPool, id: Uuid, update: UpdateTask) -> Result<Self, DbError> {
        let mut tx = pool.begin().await?;
        let mut task = Self::find_by_id(&mut *tx, id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("task {id}")))?;
        task.apply(update);
        Self::write(&mut *tx, &task).await?;
        tx.commit().await?;
        Ok(task)
    }

    /// Replace the whole list in one transaction.
    pub async fn save_all(pool: &DbPool, tasks: &[Task]) -> Result<(), DbError> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM tasks").execute(&mut *tx).await?;
        for task in tasks {
            Self::write(&mut *tx, task).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete by UUID string or legacy key and close the gap in `order`.
    pub async fn delete_by_key(pool: &DbPool, key: &str) -> Result<bool, DbError> {
        let mut tx = pool.begin().await?;
        let removed = sqlx::query("DELETE FROM tasks WHERE uuid = ?1 OR legacy_key = ?1")
            .bind(key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            return Ok(false);
        }

        let rows = sqlx::query_scalar::<_, String>(
            "SELECT data FROM tasks ORDER BY sort_order ASC, uuid ASC",
        )
        .fetch_all(&mut *tx)
        .await?;
        let remaining: Vec<Task> = rows.iter().filter_map(|data| Self::decode(data)).collect();
        for (index, mut task) in remaining.into_iter().enumerate() {
            let order = index as i64;
            if task.order != order {
                task.order = order;
                Self::write(&mut *tx, &task).await?;
            }
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn write<'e, E>(executor: E, task: &Task) -> Result<(), DbError>
    where
        E: SqliteExecutor<'e>,
    {
        let data = serde_json::to_string(task)?;
        sqlx::query(
            "INSERT INTO tasks (uuid, legacy_key, sort_order, data, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(uuid) DO UPDATE SET
                legacy_key = excluded.legacy_key,
                sort_order = excluded.sort_order,
                data = excluded.data,
                updated_at = excluded.updated_at",
        )
        .bind(task.id.to_string())
        .bind(task.legacy_key.clone())
        .bind(task.order)
        .bind(data)
        .bind(Utc::now().to_rfc3339())
        .execute(executor)
        .await?;
        Ok(())
    }
}
