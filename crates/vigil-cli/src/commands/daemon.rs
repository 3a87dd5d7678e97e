/// Engine lifecycle commands
use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc, time::Duration};
use vigil_core::{
    config::{get_data_dir, EngineConfig},
    daemon::{socket_path, Feed},
    ipc::{IpcRequest, IpcResponse},
    CalendarConnector, Collaborators, Daemon, NotificationSink,
};
use vigil_integrations::{HttpCalendarClient, LogNotifier, WebhookNotifier};
use vigil_storage::Database;

use super::helpers::{send, unexpected};

/// Run the engine in the foreground until Ctrl-C or `vigil stop`
pub async fn run_daemon(feed: Option<PathBuf>, db_path: Option<PathBuf>) -> Result<()> {
    std::fs::create_dir_all(get_data_dir()?).context("Failed to create data directory")?;

    let config = EngineConfig::load_default()?;
    let collaborators = build_collaborators(&config, db_path)?;
    let feed = feed.map_or(Feed::Stdin, Feed::Replay);

    log::info!("Starting vigil engine...");
    let daemon = Daemon::new(config, collaborators, socket_path()?);
    if let Err(e) = daemon.run_with_signals(feed).await {
        log::error!("Engine exited with a fatal error: {e:#}");
        return Err(e);
    }
    Ok(())
}

fn build_collaborators(config: &EngineConfig, db_path: Option<PathBuf>) -> Result<Collaborators> {
    let db = Arc::new(Database::new(db_path)?);

    let calendar = HttpCalendarClient::from_config(&config.calendar)?
        .map(|client| Arc::new(client) as Arc<dyn CalendarConnector>);
    if calendar.is_none() {
        log::info!("calendar.base_url not set, focus suggestions are off");
    }

    let notifier: Arc<dyn NotificationSink> = match config.notifications.webhook_url.as_deref() {
        Some(url) => Arc::new(WebhookNotifier::new(
            url,
            Duration::from_secs(config.calendar.timeout_secs),
        )?),
        None => Arc::new(LogNotifier),
    };

    Ok(Collaborators {
        sessions: db.clone(),
        settings: db,
        calendar,
        notifier,
    })
}

pub async fn stop_daemon() -> Result<()> {
    if !socket_path()?.exists() {
        println!("Engine is not running.");
        return Ok(());
    }
    match send(IpcRequest::Shutdown).await? {
        IpcResponse::Shutdown => {
            println!("Engine is shutting down.");
            Ok(())
        }
        other => Err(unexpected(&other)),
    }
}

/// Send logs to `vigil.log` in the data directory
pub fn setup_file_logging() -> Result<()> {
    use std::fs::{create_dir_all, OpenOptions};

    let log_path = get_data_dir()?.join("vigil.log");

    if let Some(parent) = log_path.parent() {
        create_dir_all(parent)?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open {}", log_path.display()))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format_timestamp_secs()
        .init();

    Ok(())
}
