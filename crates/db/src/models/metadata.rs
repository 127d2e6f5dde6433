use chrono::Utc;
use serde_json::Value;

use crate::{DbError, DbPool};

/// Free-form JSON values the bot keeps between runs, such as thread mappings
/// and the dashboard message id.
pub struct BotMetadata;

impl BotMetadata {
    pub async fn get(pool: &DbPool, key: &str) -> Result<Option<Value>, DbError> {
        let row = sqlx::query_scalar::<_, String>("SELECT value FROM bot_metadata WHERE key = ?1")
            .bind(key)
            .fetch_optional(pool)
            .await?;
        match row {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set(pool: &DbPool, key: &str, value: &Value) -> Result<(), DbError> {
        let raw = serde_json::to_string(value)?;
        sqlx::query(
            "INSERT INTO bot_metadata (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(raw)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete(pool: &DbPool, key: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM bot_metadata WHERE key = ?1")
            .bind(key)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::DBService;

    #[tokio::test]
    async fn set_overwrites_and_get_reads_back() {
        let db = DBService::new_in_memory().await.unwrap();
        assert_eq!(BotMetadata::get(&db.pool, "k").await.unwrap(), None);

        BotMetadata::set(&db.pool, "k", &json!({"a": 1})).await.unwrap();
        BotMetadata::set(&db.pool, "k", &json!("123")).await.unwrap();
        assert_eq!(
            BotMetadata::get(&db.pool, "k").await.unwrap(),
            Some(json!("123"))
        );

        assert!(BotMetadata::delete(&db.pool, "k").await.unwrap());
        assert!(!BotMetadata::delete(&db.pool, "k").await.unwrap());
    }
}
