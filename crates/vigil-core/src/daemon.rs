use crate::{
    config::{get_data_dir, EngineConfig},
    engine::{Clocking, Collaborators, Engine},
    handle::EngineHandle,
    ipc::{listen, DaemonIpcHandler},
    sample::ActivitySample,
};
use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Default location of the daemon's control socket
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn socket_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("vigil.sock"))
}

/// Where activity samples come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// A live sampler piping JSON lines into stdin
    Stdin,
    /// A recorded JSON-lines file, replayed on its own timestamps
    Replay(PathBuf),
}

impl Feed {
    #[must_use]
    pub const fn clocking(&self) -> Clocking {
        match self {
            Self::Stdin => Clocking::Realtime,
            Self::Replay(_) => Clocking::Manual,
        }
    }
}

pub struct Daemon {
    config: EngineConfig,
    collaborators: Collaborators,
    sock_path: PathBuf,
}

impl Daemon {
    #[must_use]
    pub const fn new(config: EngineConfig, collaborators: Collaborators, sock_path: PathBuf) -> Self {
        Self {
            config,
            collaborators,
            sock_path,
        }
    }

    /// Run the engine until Ctrl-C or an IPC shutdown request
    ///
    /// # Errors
    ///
    /// Returns an error if the engine could not be stopped cleanly
    pub async fn run_with_signals(self, feed: Feed) -> Result<()> {
        let clocking = feed.clocking();
        let engine = Engine::start(self.config, self.collaborators, clocking).await;
        let shutdown_signal = CancellationToken::new();

        let ipc_handler = Arc::new(DaemonIpcHandler::new(
            engine.clone(),
            clocking,
            shutdown_signal.clone(),
        ));
        let sock_path = self.sock_path;
        let ipc = tokio::spawn(async move {
            if let Err(e) = listen(ipc_handler, &sock_path).await {
                log::error!("IPC listener failed: {e}");
            }
        });

        let pump = {
            let engine = engine.clone();
            tokio::spawn(async move {
                match run_feed(&feed, &engine).await {
                    Ok(count) => log::info!("Activity feed closed after {count} samples"),
                    Err(e) => log::error!("Activity feed failed: {e:#}"),
                }
            })
        };

        log::info!("Daemon started ({clocking:?} clock)");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl-C, shutting down...");
            }
            () = shutdown_signal.cancelled() => {}
        }
        shutdown_signal.cancel();
        pump.abort();

        // Persist the open session before exiting
        engine
            .shutdown()
            .await
            .context("Engine stopped before shutdown")?;
        let _ = ipc.await;
        log::info!("Daemon shut down gracefully.");
        Ok(())
    }
}

async fn run_feed(feed: &Feed, engine: &EngineHandle) -> Result<usize> {
    match feed {
        Feed::Stdin => pump(BufReader::new(tokio::io::stdin()), engine, false).await,
        Feed::Replay(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open feed {}", path.display()))?;
            log::info!("Replaying activity from {}", path.display());
            pump(BufReader::new(file), engine, true).await
        }
    }
}

/// Push every sample line from `reader` into the engine. Replays also tick
/// the engine at each sample's timestamp. Returns the number of samples sent.
///
/// # Errors
///
/// Returns an error if reading fails or the engine has stopped
pub async fn pump<R>(reader: R, engine: &EngineHandle, replay: bool) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let sample = match ActivitySample::parse_line(&line) {
            Ok(sample) => sample,
            Err(e) => {
                log::warn!("Skipping feed line: {e:#}");
                continue;
            }
        };

        let at = sample.timestamp;
        engine.push_sample(sample).await?;
        if replay {
            engine.tick(at).await?;
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Notification, NotificationSink};
    use crate::presence::PresenceStatus;
    use crate::session_manager::StartSessionRequest;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use vigil_storage::{Database, SessionStatus};

    struct Silent;

    #[async_trait]
    impl NotificationSink for Silent {
        async fn dispatch(&self, _notification: &Notification) -> Result<()> {
            Ok(())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn line(secs: i64, app: &str, input: bool) -> String {
        format!(
            r#"{{"timestamp":"{}","foreground_app":"{app}","has_user_input":{input}}}"#,
            at(secs).to_rfc3339()
        )
    }

    async fn manual_engine() -> EngineHandle {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let collaborators = Collaborators {
            sessions: db.clone(),
            settings: db,
            calendar: None,
            notifier: Arc::new(Silent),
        };
        Engine::start(EngineConfig::default(), collaborators, Clocking::Manual).await
    }

    #[test]
    fn test_feed_clocking() {
        assert_eq!(Feed::Stdin.clocking(), Clocking::Realtime);
        assert_eq!(
            Feed::Replay(PathBuf::from("feed.jsonl")).clocking(),
            Clocking::Manual
        );
    }

    #[tokio::test]
    async fn test_pump_skips_bad_lines() {
        let engine = manual_engine().await;
        let feed = format!(
            "{}\n\nnot json\n{}\n",
            line(0, "Code", true),
            line(1, "Terminal", true)
        );

        let count = pump(BufReader::new(feed.as_bytes()), &engine, true)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let snapshot = engine.status().await.unwrap();
        assert_eq!(snapshot.current_app.as_deref(), Some("Terminal"));
        assert_eq!(snapshot.as_of, at(1));
        assert_eq!(snapshot.presence.state, PresenceStatus::Active);
    }

    #[tokio::test]
    async fn test_replay_auto_pauses_across_gap() {
        let engine = manual_engine().await;
        engine
            .start_session(StartSessionRequest::default(), at(0))
            .await
            .unwrap();

        let feed = [
            line(0, "Code", true),
            line(30, "Code", true),
            line(2000, "Code", true),
        ]
        .join("\n");
        pump(BufReader::new(feed.as_bytes()), &engine, true)
            .await
            .unwrap();

        let snapshot = engine.status().await.unwrap();
        let session = snapshot.session.unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
        assert_eq!(snapshot.billable_seconds, 30);
    }
}
