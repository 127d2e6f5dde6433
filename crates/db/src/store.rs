//! Storage seams the sync layer is written against.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    DBService, DbError,
    models::{
        metadata::BotMetadata,
        task::{CreateTask, Task, UpdateTask},
    },
};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Every task, ordered by `order`.
    async fn get_all(&self) -> Result<Vec<Task>, DbError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Task>, DbError>;
    /// Resolve a UUID string or a legacy key.
    async fn get_by_key(&self, key: &str) -> Result<Option<Task>, DbError>;
    async fn create(&self, data: CreateTask) -> Result<Task, DbError>;
    async fn update_fields(&self, id: Uuid, update: UpdateTask) -> Result<Task, DbError>;
    async fn save_all(&self, tasks: &[Task]) -> Result<(), DbError>;
    async fn delete_by_key(&self, key: &str) -> Result<bool, DbError>;
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_blob(&self, key: &str) -> Result<Option<Value>, DbError>;
    async fn set_blob(&self, key: &str, value: &Value) -> Result<(), DbError>;
}

#[async_trait]
impl TaskStore for DBService {
    async fn get_all(&self) -> Result<Vec<Task>, DbError> {
        Task::find_all(&self.pool).await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Task>, DbError> {
        Task::find_by_id(&self.pool, id).await
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<Task>, DbError> {
        Task::find_by_key(&self.pool, key).await
    }

    async fn create(&self, data: CreateTask) -> Result<Task, DbError> {
        Task::create(&self.pool, data).await
    }

    async fn update_fields(&self, id: Uuid, update: UpdateTask) -> Result<Task, DbError> {
        Task::update(&self.pool, id, update).await
    }

    async fn save_all(&self, tasks: &[Task]) -> Result<(), DbError> {
        Task::save_all(&self.pool, tasks).await
    }

    async fn delete_by_key(&self, key: &str) -> Result<bool, DbError> {
        Task::delete_by_key(&self.pool, key).await
    }
}

#[async_trait]
impl MetadataStore for DBService {
    async fn get_blob(&self, key: &str) -> Result<Option<Value>, DbError> {
        BotMetadata::get(&self.pool, key).await
    }

    async fn set_blob(&self, key: &str, value: &Value) -> Result<(), DbError> {
        BotMetadata::set(&self.pool, key, value).await
    }
}
