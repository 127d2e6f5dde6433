use std::time::Duration;

use db::RetryPolicy;
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
pub const MIN_SYNC_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

fn default_database_path() -> String {
    "data/taskmaster.db".to_string()
}

/// Accepts platform ids written either as JSON numbers or as strings.
fn deserialize_snowflake<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => parse_snowflake(&s),
        _ => None,
    })
}

pub(crate) fn parse_snowflake(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|id| *id > 0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreRetryConfig {
    #[serde(alias = "maxAttempts")]
    pub max_attempts: u32,
    #[serde(alias = "initialBackoffMs")]
    pub initial_backoff_ms: u64,
    #[serde(alias = "maxBackoffMs")]
    pub max_backoff_ms: u64,
}

impl Default for StoreRetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
        }
    }
}

impl StoreRetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(alias = "botToken", skip_serializing)]
    pub bot_token: Option<String>,
    #[serde(alias = "guildId", deserialize_with = "deserialize_snowflake")]
    pub guild_id: Option<u64>,
    #[serde(alias = "forumChannelId", deserialize_with = "deserialize_snowflake")]
    pub forum_channel_id: Option<u64>,
    #[serde(alias = "dashboardChannelId", deserialize_with = "deserialize_snowflake")]
    pub dashboard_channel_id: Option<u64>,
    #[serde(alias = "syncIntervalSecs")]
    pub sync_interval_secs: u64,
    #[serde(alias = "maxConcurrency")]
    pub max_concurrency: usize,
    /// Serialize whole passes behind one lock instead of tolerating overlap.
    #[serde(alias = "exclusivePasses")]
    pub exclusive_passes: bool,
    #[serde(alias = "databasePath")]
    pub database_path: String,
    #[serde(alias = "storeRetry")]
    pub store_retry: StoreRetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            guild_id: None,
            forum_channel_id: None,
            dashboard_channel_id: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            exclusive_passes: false,
            database_path: default_database_path(),
            store_retry: StoreRetryConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_raw(raw_config: &str) -> Self {
        match serde_json::from_str::<SyncConfig>(raw_config) {
            Ok(config) => config.normalized(),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse config (line {}, column {}): {}, using default",
                    e.line(),
                    e.column(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn normalized(mut self) -> Self {
        if self.sync_interval_secs < MIN_SYNC_INTERVAL_SECS {
            tracing::warn!(
                "Sync interval {}s is below the minimum, using {}s",
                self.sync_interval_secs,
                MIN_SYNC_INTERVAL_SECS
            );
            self.sync_interval_secs = MIN_SYNC_INTERVAL_SECS;
        }

        if self.max_concurrency == 0 {
            tracing::warn!("max_concurrency set to 0, using 1");
            self.max_concurrency = 1;
        }

        if self.database_path.trim().is_empty() {
            self.database_path = default_database_path();
        }

        if matches!(self.bot_token.as_deref(), Some(token) if token.trim().is_empty()) {
            self.bot_token = None;
        }

        if self.store_retry.max_attempts == 0 {
            self.store_retry.max_attempts = 1;
        }

        self
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_env_overrides_from(|name| std::env::var(name).ok())
    }

    pub(crate) fn with_env_overrides_from<F>(mut self, get_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = get_env("DISCORD_BOT_TOKEN") {
            self.bot_token = Some(token);
        }
        read_env_snowflake("DISCORD_GUILD_ID", &mut self.guild_id, &get_env);
        read_env_snowflake("TASK_FORUM_CHANNEL", &mut self.forum_channel_id, &get_env);
        read_env_snowflake("DASHBOARD_CHANNEL", &mut self.dashboard_channel_id, &get_env);
        if let Some(value) = get_env("TASK_SYNC_INTERVAL_SECS") {
            match value.trim().parse::<u64>() {
                Ok(secs) => self.sync_interval_secs = secs,
                Err(err) => tracing::warn!(
                    "Invalid TASK_SYNC_INTERVAL_SECS='{value}': {err}. Keeping {}.",
                    self.sync_interval_secs
                ),
            }
        }
        if let Some(path) = get_env("TASKMASTER_DB_PATH") {
            self.database_path = path;
        }
        self.normalized()
    }
}

fn read_env_snowflake<F>(name: &str, target: &mut Option<u64>, get_env: &F)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = get_env(name) else {
        return;
    };
    match parse_snowflake(&value) {
        Some(id) => *target = Some(id),
        None => tracing::warn!("Invalid {name}='{value}', ignoring"),
    }
}
