use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{self, Error as AnyhowError};
use db::{DBService, DbError};
use secrecy::SecretString;
use services::services::{
    config::{ConfigError, load_config_from_file, validate_for_bot},
    dashboard::DashboardService,
    discord::DiscordClient,
    forum_sync::{ForumSyncService, SyncOptions},
    surface::{ChannelId, SurfaceError},
    trigger::SyncTrigger,
};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tracing_subscriber::{EnvFilter, prelude::*};

const DEFAULT_CONFIG_PATH: &str = "config.json";
const CONFIG_PATH_ENV: &str = "TASKMASTER_CONFIG";
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TaskmasterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error(transparent)]
    Other(#[from] AnyhowError),
}

#[tokio::main]
async fn main() -> Result<(), TaskmasterError> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,bot={level},services={level},db={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string)
        .map_err(|e| anyhow::anyhow!("Failed to create tracing filter: {e}"))?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let config_path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = load_config_from_file(&config_path).await;
    validate_for_bot(&config)?;

    let db = Arc::new(DBService::new(&PathBuf::from(&config.database_path)).await?);

    let token = config
        .bot_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("bot token missing after validation"))?;
    let forum_id = config
        .forum_channel_id
        .map(ChannelId)
        .ok_or_else(|| anyhow::anyhow!("forum channel missing after validation"))?;
    let client = Arc::new(DiscordClient::new(SecretString::from(token), config.guild_id)?);

    let forum = Arc::new(ForumSyncService::new(
        db.clone(),
        db.clone(),
        client.clone(),
        forum_id,
        SyncOptions::from(&config),
    ));
    let dashboard = config.dashboard_channel_id.map(|channel| {
        Arc::new(DashboardService::new(
            db.clone(),
            db.clone(),
            client.clone(),
            ChannelId(channel),
            config.store_retry.policy(),
        ))
    });
    if dashboard.is_none() {
        tracing::info!("No dashboard channel configured; dashboard updates disabled");
    }
    let trigger = SyncTrigger::new(forum, dashboard);

    tracing::info!(
        forum_channel = %forum_id,
        interval_secs = config.sync_interval().as_secs(),
        "Task sync starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sync_loop = trigger.spawn_periodic(config.sync_interval(), shutdown_rx);
    if run_until_stopped(sync_loop, shutdown_tx, shutdown_signal, GRACEFUL_SHUTDOWN_TIMEOUT).await
        == Stop::Forced
    {
        std::process::exit(130);
    }

    db.pool.close().await;
    tracing::info!("Task sync stopped");
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Stop {
    LoopEnded,
    Drained,
    Forced,
}

/// Drive the sync loop until it ends or `signal` fires. The first signal lets the
/// running pass finish within `grace`; a second signal or the deadline forces exit.
async fn run_until_stopped<S, F>(
    mut sync_loop: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    mut signal: S,
    grace: Duration,
) -> Stop
where
    S: FnMut() -> F,
    F: Future<Output = ()>,
{
    tokio::select! {
        res = &mut sync_loop => {
            if let Err(err) = res {
                tracing::error!(error = %err, "Sync loop stopped unexpectedly");
            }
            return Stop::LoopEnded;
        }
        () = signal() => {}
    }

    tracing::info!("Shutdown signal received, finishing the current pass (press Ctrl+C again to force)");
    let _ = shutdown.send(true);

    tokio::select! {
        _ = &mut sync_loop => Stop::Drained,
        () = signal() => {
            tracing::warn!("Second shutdown signal received, forcing exit");
            Stop::Forced
        }
        () = tokio::time::sleep(grace) => {
            tracing::warn!("Graceful shutdown timed out after {:?}, exiting immediately", grace);
            Stop::Forced
        }
    }
}

/// Resolves on Ctrl+C, or on SIGTERM where there is one.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}
