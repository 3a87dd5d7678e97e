use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
};
use tokio_util::sync::CancellationToken;
use vigil_storage::WorkSession;

use crate::distraction::{BypassEvent, BypassOutcome};
use crate::engine::Clocking;
use crate::error::{EngineError, EngineResult};
use crate::focus_session::{FocusSession, StartFocusRequest};
use crate::handle::{EngineHandle, EngineSnapshot};
use crate::session_manager::StartSessionRequest;

/// IPC request from CLI to daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum IpcRequest {
    Status,
    StartSession {
        client_name: Option<String>,
        project_name: Option<String>,
        task_description: Option<String>,
    },
    PauseSession,
    ResumeSession,
    EndSession {
        notes: Option<String>,
    },
    RecordScreenshot,
    DismissWarning,
    StartFocus {
        title: Option<String>,
        planned_minutes: Option<u32>,
    },
    PauseFocus,
    ResumeFocus,
    EndFocus,
    Bypass,
    StayFocused,
    DismissBlock,
    ConfirmCandidate {
        event_id: String,
    },
    DismissCandidate {
        event_id: String,
    },
    SnoozeCandidate {
        event_id: String,
        minutes: u32,
    },
    RefreshCalendar,
    Shutdown,
}

/// IPC response from daemon to CLI
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum IpcResponse {
    Status(Box<EngineSnapshot>),
    Session(Box<WorkSession>),
    Focus(FocusSession),
    Screenshots(u32),
    WarningDismissed(bool),
    Bypass(BypassOutcome),
    BlockResolved(BypassEvent),
    Snoozed { until: DateTime<Utc> },
    Ok,
    Shutdown,
    Error { kind: String, message: String },
}

impl From<EngineError> for IpcResponse {
    fn from(e: EngineError) -> Self {
        Self::Error {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    /// Send one request and wait for the daemon's answer
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is not reachable or the reply cannot be decoded
    pub async fn send_command(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.sock_path)
            .await
            .with_context(|| {
                format!(
                    "Could not reach the daemon at {}. Is `vigil run` running?",
                    self.sock_path.display()
                )
            })?;

        let encoded = bincode::serialize(&request)?;
        stream.write_all(&encoded).await?;
        stream.shutdown().await?;

        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        let response: IpcResponse =
            bincode::deserialize(&buffer).context("Invalid response from daemon")?;

        Ok(response)
    }
}

/// Serves IPC requests against a running engine
pub struct DaemonIpcHandler {
    engine: EngineHandle,
    clocking: Clocking,
    shutdown_signal: CancellationToken,
}

impl DaemonIpcHandler {
    #[must_use]
    pub const fn new(
        engine: EngineHandle,
        clocking: Clocking,
        shutdown_signal: CancellationToken,
    ) -> Self {
        Self {
            engine,
            clocking,
            shutdown_signal,
        }
    }

    /// Commands are stamped with wall-clock time, or with the engine's own
    /// clock when a recorded feed is being replayed.
    fn now(&self) -> DateTime<Utc> {
        match self.clocking {
            Clocking::Realtime => Utc::now(),
            Clocking::Manual => self.engine.snapshot().as_of,
        }
    }

    /// Apply `request` to the engine
    pub async fn respond(&self, request: IpcRequest) -> IpcResponse {
        let at = self.now();
        let engine = &self.engine;
        let result: EngineResult<IpcResponse> = match request {
            IpcRequest::Status => engine
                .status()
                .await
                .map(|snapshot| IpcResponse::Status(Box::new(snapshot))),
            IpcRequest::StartSession {
                client_name,
                project_name,
                task_description,
            } => {
                let request = StartSessionRequest {
                    client_name,
                    project_name,
                    task_description,
                };
                engine.start_session(request, at).await.map(session)
            }
            IpcRequest::PauseSession => engine.pause_session(at).await.map(session),
            IpcRequest::ResumeSession => engine.resume_session(at).await.map(session),
            IpcRequest::EndSession { notes } => engine.end_session(notes, at).await.map(session),
            IpcRequest::RecordScreenshot => engine
                .record_screenshot(at)
                .await
                .map(IpcResponse::Screenshots),
            IpcRequest::DismissWarning => engine
                .dismiss_warning(at)
                .await
                .map(IpcResponse::WarningDismissed),
            IpcRequest::StartFocus {
                title,
                planned_minutes,
            } => engine
                .start_focus(StartFocusRequest::manual(title, planned_minutes), at)
                .await
                .map(IpcResponse::Focus),
            IpcRequest::PauseFocus => engine.pause_focus(at).await.map(IpcResponse::Focus),
            IpcRequest::ResumeFocus => engine.resume_focus(at).await.map(IpcResponse::Focus),
            IpcRequest::EndFocus => engine.end_focus(at).await.map(IpcResponse::Focus),
            IpcRequest::Bypass => engine.bypass(at).await.map(IpcResponse::Bypass),
            IpcRequest::StayFocused => engine
                .stay_focused(at)
                .await
                .map(IpcResponse::BlockResolved),
            IpcRequest::DismissBlock => engine
                .dismiss_block(at)
                .await
                .map(IpcResponse::BlockResolved),
            IpcRequest::ConfirmCandidate { event_id } => engine
                .confirm_candidate(&event_id, at)
                .await
                .map(IpcResponse::Focus),
            IpcRequest::DismissCandidate { event_id } => engine
                .dismiss_candidate(&event_id)
                .await
                .map(|()| IpcResponse::Ok),
            IpcRequest::SnoozeCandidate { event_id, minutes } => engine
                .snooze_candidate(&event_id, minutes, at)
                .await
                .map(|until| IpcResponse::Snoozed { until }),
            IpcRequest::RefreshCalendar => engine
                .refresh_calendar(at)
                .await
                .map(|()| IpcResponse::Ok),
            IpcRequest::Shutdown => {
                log::info!("Shutdown requested over IPC");
                self.shutdown_signal.cancel();
                Ok(IpcResponse::Shutdown)
            }
        };

        result.unwrap_or_else(IpcResponse::from)
    }

    /// Answer one request on `stream`
    ///
    /// # Errors
    ///
    /// Returns an error if the response cannot be written
    pub async fn handle(&self, stream: &mut UnixStream, request: IpcRequest) -> Result<()> {
        log::debug!("IPC request: {request:?}");
        let response = self.respond(request).await;
        let encoded = bincode::serialize(&response)?;
        stream.write_all(&encoded).await?;
        Ok(())
    }
}

fn session(session: WorkSession) -> IpcResponse {
    IpcResponse::Session(Box::new(session))
}

/// Accept connections on `sock_path` until the handler's shutdown signal fires
///
/// # Errors
///
/// Returns an error if the socket cannot be bound
pub async fn listen(handler: Arc<DaemonIpcHandler>, sock_path: &Path) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    let listener = UnixListener::bind(sock_path)?;
    log::info!("IPC listening on {}", sock_path.display());

    loop {
        let accepted = tokio::select! {
            () = handler.shutdown_signal.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((mut stream, _)) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    match stream.read_to_end(&mut buf).await {
                        Ok(n) if n > 0 => match bincode::deserialize::<IpcRequest>(&buf) {
                            Ok(request) => {
                                if let Err(e) = handler.handle(&mut stream, request).await {
                                    log::error!("IPC handle error: {e}");
                                }
                            }
                            Err(e) => {
                                log::error!("IPC deserialize error: {e}");
                            }
                        },
                        Ok(_) => {} // Connection closed
                        Err(e) => {
                            log::error!("IPC read error: {e}");
                        }
                    }
                });
            }
            Err(e) => {
                log::error!("IPC accept error: {e}");
            }
        }
    }

    let _ = fs::remove_file(sock_path);
    Ok(())
}
