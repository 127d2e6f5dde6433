use std::path::Path;

use thiserror::Error;

mod schema;

pub use schema::{
    DEFAULT_MAX_CONCURRENCY, DEFAULT_SYNC_INTERVAL_SECS, MIN_SYNC_INTERVAL_SECS, StoreRetryConfig,
    SyncConfig,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Will always return config, falling back to defaults on missing/invalid files.
/// Environment overrides are applied on top.
pub async fn load_config_from_file(config_path: &Path) -> SyncConfig {
    let config = match tokio::fs::read_to_string(config_path).await {
        Ok(raw_config) => SyncConfig::from_raw(&raw_config),
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                tracing::info!(path = %config_path.display(), "No config file found, using defaults");
            } else {
                tracing::warn!("Failed to read config file: {}", err);
            }
            SyncConfig::default()
        }
    };
    config.with_env_overrides()
}

/// Settings the bot cannot run without.
pub fn validate_for_bot(config: &SyncConfig) -> Result<(), ConfigError> {
    if config.bot_token.is_none() {
        return Err(ConfigError::ValidationError(
            "DISCORD_BOT_TOKEN is not set".to_string(),
        ));
    }
    if config.forum_channel_id.is_none() {
        return Err(ConfigError::ValidationError(
            "TASK_FORUM_CHANNEL is not set".to_string(),
        ));
    }
    Ok(())
}
