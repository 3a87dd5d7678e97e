use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use vigil_storage::WorkSession;

use crate::distraction::{BlockDecision, BypassEvent, BypassOutcome};
use crate::engine::{Command, Reply};
use crate::error::{EngineError, EngineResult};
use crate::events::EngineEvent;
use crate::focus_session::{FocusSession, StartFocusRequest};
use crate::focus_trigger::FocusAutoStartCandidate;
use crate::presence::PresenceState;
use crate::sample::ActivitySample;
use crate::session_manager::{SessionTotals, StartSessionRequest};

/// Read-only view of engine state, published after every command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub as_of: DateTime<Utc>,
    pub presence: PresenceState,
    pub session: Option<WorkSession>,
    pub billable_seconds: u64,
    pub totals: Option<SessionTotals>,
    pub focus: Option<FocusSession>,
    pub active_block: Option<BlockDecision>,
    pub candidates: Vec<FocusAutoStartCandidate>,
    pub current_app: Option<String>,
    pub calendar_enabled: bool,
    pub calendar_available: bool,
    /// Request time of the last successful calendar fetch
    pub calendar_synced_at: Option<DateTime<Utc>>,
    pub pending_writes: usize,
}

impl EngineSnapshot {
    #[must_use]
    pub fn initial(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            presence: PresenceState::default(),
            session: None,
            billable_seconds: 0,
            totals: None,
            focus: None,
            active_block: None,
            candidates: Vec::new(),
            current_app: None,
            calendar_enabled: false,
            calendar_available: false,
            calendar_synced_at: None,
            pending_writes: 0,
        }
    }
}

/// Cheap, cloneable access to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<EngineSnapshot>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    pub(crate) const fn new(
        commands: mpsc::Sender<Command>,
        snapshots: watch::Receiver<EngineSnapshot>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            commands,
            snapshots,
            events,
        }
    }

    /// Latest published snapshot
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified on every publish
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// # Errors
    ///
    /// Returns `Unavailable` if the engine has stopped
    pub async fn push_sample(&self, sample: ActivitySample) -> EngineResult<()> {
        self.send(Command::Sample(sample)).await
    }

    /// # Errors
    ///
    /// Returns `Unavailable` if the engine has stopped
    pub async fn tick(&self, at: DateTime<Utc>) -> EngineResult<()> {
        self.send(Command::Tick { at }).await
    }

    /// # Errors
    ///
    /// Returns `Unavailable` if the engine has stopped
    pub async fn refresh_session(&self, at: DateTime<Utc>) -> EngineResult<()> {
        self.send(Command::SessionRefresh { at }).await
    }

    /// Ask for a calendar fetch outside the regular poll
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the engine has stopped
    pub async fn refresh_calendar(&self, at: DateTime<Utc>) -> EngineResult<()> {
        self.send(Command::RefreshCalendar { at }).await
    }

    /// Snapshot taken after every command queued before this one
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the engine has stopped
    pub async fn status(&self) -> EngineResult<EngineSnapshot> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// # Errors
    ///
    /// `Conflict` if a session is open, `Unavailable` if the engine has stopped
    pub async fn start_session(
        &self,
        request: StartSessionRequest,
        at: DateTime<Utc>,
    ) -> EngineResult<WorkSession> {
        self.request(|reply| Command::StartSession { request, at, reply })
            .await
    }

    /// # Errors
    ///
    /// `NotFound`, `Conflict` or `StaleOperation` from the session manager
    pub async fn pause_session(&self, at: DateTime<Utc>) -> EngineResult<WorkSession> {
        self.request(|reply| Command::PauseSession { at, reply })
            .await
    }

    /// # Errors
    ///
    /// `NotFound`, `Conflict` or `StaleOperation` from the session manager
    pub async fn resume_session(&self, at: DateTime<Utc>) -> EngineResult<WorkSession> {
        self.request(|reply| Command::ResumeSession { at, reply })
            .await
    }

    /// # Errors
    ///
    /// `NotFound`, `Conflict` or `StaleOperation` from the session manager
    pub async fn end_session(
        &self,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> EngineResult<WorkSession> {
        self.request(|reply| Command::EndSession { notes, at, reply })
            .await
    }

    /// # Errors
    ///
    /// `NotFound` or `Conflict` without an open session
    pub async fn record_screenshot(&self, at: DateTime<Utc>) -> EngineResult<u32> {
        self.request(|reply| Command::RecordScreenshot { at, reply })
            .await
    }

    /// Returns whether an open AFK warning was acknowledged
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the engine has stopped
    pub async fn dismiss_warning(&self, at: DateTime<Utc>) -> EngineResult<bool> {
        self.request(|reply| Command::DismissWarning { at, reply })
            .await
    }

    /// # Errors
    ///
    /// `Conflict` if a focus session is running
    pub async fn start_focus(
        &self,
        request: StartFocusRequest,
        at: DateTime<Utc>,
    ) -> EngineResult<FocusSession> {
        self.request(|reply| Command::StartFocus { request, at, reply })
            .await
    }

    /// # Errors
    ///
    /// `NotFound` or `Conflict` from the focus session manager
    pub async fn pause_focus(&self, at: DateTime<Utc>) -> EngineResult<FocusSession> {
        self.request(|reply| Command::PauseFocus { at, reply })
            .await
    }

    /// # Errors
    ///
    /// `NotFound` or `Conflict` from the focus session manager
    pub async fn resume_focus(&self, at: DateTime<Utc>) -> EngineResult<FocusSession> {
        self.request(|reply| Command::ResumeFocus { at, reply })
            .await
    }

    /// # Errors
    ///
    /// `NotFound` without a running focus session
    pub async fn end_focus(&self, at: DateTime<Utc>) -> EngineResult<FocusSession> {
        self.request(|reply| Command::EndFocus { at, reply }).await
    }

    /// Ask to bypass the active block. Strict mode answers `Denied`.
    ///
    /// # Errors
    ///
    /// `NotFound` without an active block
    pub async fn bypass(&self, at: DateTime<Utc>) -> EngineResult<BypassOutcome> {
        self.request(|reply| Command::Bypass { at, reply }).await
    }

    /// # Errors
    ///
    /// `NotFound` without an active block
    pub async fn stay_focused(&self, at: DateTime<Utc>) -> EngineResult<BypassEvent> {
        self.request(|reply| Command::StayFocused { at, reply })
            .await
    }

    /// # Errors
    ///
    /// `NotFound` without an active block
    pub async fn dismiss_block(&self, at: DateTime<Utc>) -> EngineResult<BypassEvent> {
        self.request(|reply| Command::DismissBlock { at, reply })
            .await
    }

    /// Accept a focus candidate and start a focus session for it
    ///
    /// # Errors
    ///
    /// `Disabled`, `NotFound` or `Conflict`
    pub async fn confirm_candidate(
        &self,
        event_id: &str,
        at: DateTime<Utc>,
    ) -> EngineResult<FocusSession> {
        let event_id = event_id.to_string();
        self.request(|reply| Command::ConfirmCandidate {
            event_id,
            at,
            reply,
        })
        .await
    }

    /// # Errors
    ///
    /// `Disabled`, `NotFound` or `Conflict`
    pub async fn dismiss_candidate(&self, event_id: &str) -> EngineResult<()> {
        let event_id = event_id.to_string();
        self.request(|reply| Command::DismissCandidate { event_id, reply })
            .await
    }

    /// Returns the time the candidate may be offered again
    ///
    /// # Errors
    ///
    /// `Disabled`, `NotFound` or `Conflict`
    pub async fn snooze_candidate(
        &self,
        event_id: &str,
        minutes: u32,
        at: DateTime<Utc>,
    ) -> EngineResult<DateTime<Utc>> {
        let event_id = event_id.to_string();
        self.request(|reply| Command::SnoozeCandidate {
            event_id,
            minutes,
            at,
            reply,
        })
        .await
    }

    /// Stop timers, flush pending writes and end the engine task
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the engine had already stopped
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn send(&self, command: Command) -> EngineResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Unavailable)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> EngineResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| EngineError::Unavailable)?
    }
}
