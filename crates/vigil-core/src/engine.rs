//! The engine actor.
//!
//! One tokio task owns every manager and handles commands strictly in
//! arrival order: activity samples, timer ticks, user actions and the
//! completions of its own background I/O. Readers only ever see published
//! [`EngineSnapshot`] values and the [`EngineEvent`] broadcast.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vigil_storage::{FocusSettings, WorkSession};

use crate::alerts::{AlertDispatcher, DedupeKey, NotificationSink};
use crate::config::EngineConfig;
use crate::distraction::{BypassEvent, BypassOutcome, DistractionPolicy, SettingsSource};
use crate::error::{EngineError, EngineResult};
use crate::events::EngineEvent;
use crate::focus_session::{FocusSession, FocusSessionManager, FocusSource, StartFocusRequest};
use crate::focus_trigger::{
    CalendarConnector, CalendarEvent, FocusTriggerEvaluator, TriggerOptions,
};
use crate::handle::{EngineHandle, EngineSnapshot};
use crate::persistence::{Backoff, PersistOp, PersistenceWriter, SessionStore};
use crate::presence::{PresenceDetector, PresenceEvent};
use crate::sample::ActivitySample;
use crate::session_manager::{SessionManager, StartSessionRequest};

const COMMAND_QUEUE_DEPTH: usize = 1024;
const EVENT_BUFFER: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub type Reply<T> = oneshot::Sender<EngineResult<T>>;

/// External services the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionStore>,
    pub settings: Arc<dyn SettingsSource>,
    /// No calendar disables focus triggers
    pub calendar: Option<Arc<dyn CalendarConnector>>,
    pub notifier: Arc<dyn NotificationSink>,
}

/// Where time comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clocking {
    /// Internal timers tick on wall-clock time
    Realtime,
    /// No timers. The driver sends ticks itself, e.g. when replaying a feed.
    Manual,
}

/// Everything the engine task can be asked to do
pub enum Command {
    Sample(ActivitySample),
    Tick {
        at: DateTime<Utc>,
    },
    SessionRefresh {
        at: DateTime<Utc>,
    },
    RefreshCalendar {
        at: DateTime<Utc>,
    },
    Status {
        reply: Reply<EngineSnapshot>,
    },
    StartSession {
        request: StartSessionRequest,
        at: DateTime<Utc>,
        reply: Reply<WorkSession>,
    },
    PauseSession {
        at: DateTime<Utc>,
        reply: Reply<WorkSession>,
    },
    ResumeSession {
        at: DateTime<Utc>,
        reply: Reply<WorkSession>,
    },
    EndSession {
        notes: Option<String>,
        at: DateTime<Utc>,
        reply: Reply<WorkSession>,
    },
    RecordScreenshot {
        at: DateTime<Utc>,
        reply: Reply<u32>,
    },
    DismissWarning {
        at: DateTime<Utc>,
        reply: Reply<bool>,
    },
    StartFocus {
        request: StartFocusRequest,
        at: DateTime<Utc>,
        reply: Reply<FocusSession>,
    },
    PauseFocus {
        at: DateTime<Utc>,
        reply: Reply<FocusSession>,
    },
    ResumeFocus {
        at: DateTime<Utc>,
        reply: Reply<FocusSession>,
    },
    EndFocus {
        at: DateTime<Utc>,
        reply: Reply<FocusSession>,
    },
    Bypass {
        at: DateTime<Utc>,
        reply: Reply<BypassOutcome>,
    },
    StayFocused {
        at: DateTime<Utc>,
        reply: Reply<BypassEvent>,
    },
    DismissBlock {
        at: DateTime<Utc>,
        reply: Reply<BypassEvent>,
    },
    ConfirmCandidate {
        event_id: String,
        at: DateTime<Utc>,
        reply: Reply<FocusSession>,
    },
    DismissCandidate {
        event_id: String,
        reply: Reply<()>,
    },
    SnoozeCandidate {
        event_id: String,
        minutes: u32,
        at: DateTime<Utc>,
        reply: Reply<DateTime<Utc>>,
    },
    SettingsLoaded {
        at: DateTime<Utc>,
        result: Result<FocusSettings, String>,
    },
    CalendarLoaded {
        at: DateTime<Utc>,
        result: Result<Vec<CalendarEvent>, String>,
    },
    PersistenceSettled {
        session_id: Uuid,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

pub struct Engine {
    config: EngineConfig,
    clocking: Clocking,
    collaborators: Collaborators,

    presence: PresenceDetector,
    sessions: SessionManager,
    focus: FocusSessionManager,
    distraction: DistractionPolicy,
    triggers: FocusTriggerEvaluator,
    alerts: AlertDispatcher,

    clock: Option<DateTime<Utc>>,
    last_sample: Option<ActivitySample>,
    settings: Option<FocusSettings>,
    settings_inflight: bool,
    calendar_inflight: bool,
    calendar_available: bool,
    calendar_synced_at: Option<DateTime<Utc>>,
    pending_writes: usize,

    commands: mpsc::Sender<Command>,
    snapshots: watch::Sender<EngineSnapshot>,
    events: broadcast::Sender<EngineEvent>,
    writer: Option<PersistenceWriter>,
    shutdown: CancellationToken,
    refresh_timer: Option<CancellationToken>,
}

impl Engine {
    /// Start the engine task and return a handle to it. A session left open
    /// by a previous run is restored from the session store first.
    pub async fn start(
        config: EngineConfig,
        collaborators: Collaborators,
        clocking: Clocking,
    ) -> EngineHandle {
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (snapshots, snapshot_rx) = watch::channel(EngineSnapshot::initial(Utc::now()));
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let shutdown = CancellationToken::new();

        let writer = PersistenceWriter::spawn(
            collaborators.sessions.clone(),
            Backoff::from_config(&config.persistence),
            shutdown.child_token(),
            commands.clone(),
        );
        let options = TriggerOptions::from_config(&config.focus);
        let triggers = if collaborators.calendar.is_some() {
            FocusTriggerEvaluator::new(options)
        } else {
            log::info!("No calendar configured, focus triggers disabled");
            FocusTriggerEvaluator::disabled(options)
        };

        let mut engine = Self {
            presence: PresenceDetector::from_config(&config.presence),
            sessions: SessionManager::new(),
            focus: FocusSessionManager::new(config.focus.default_focus_minutes),
            distraction: DistractionPolicy::new(),
            triggers,
            alerts: AlertDispatcher::new(config.alerts.clone()),
            config,
            clocking,
            collaborators,
            clock: None,
            last_sample: None,
            settings: None,
            settings_inflight: false,
            calendar_inflight: false,
            calendar_available: false,
            calendar_synced_at: None,
            pending_writes: 0,
            commands: commands.clone(),
            snapshots,
            events: events.clone(),
            writer: Some(writer),
            shutdown,
            refresh_timer: None,
        };

        engine.restore_open_session().await;
        if clocking == Clocking::Realtime {
            engine.spawn_timers();
        }
        engine.publish();
        tokio::spawn(engine.run(rx));

        EngineHandle::new(commands, snapshot_rx, events)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        log::info!("Engine started");
        while let Some(command) = rx.recv().await {
            if !self.handle(command).await {
                break;
            }
            self.publish();
        }
        log::info!("Engine stopped");
    }

    /// Apply one command. Returns false once the engine should stop.
    #[allow(clippy::cognitive_complexity)]
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Sample(sample) => self.on_sample(sample),
            Command::Tick { at } => self.on_tick(at),
            Command::SessionRefresh { at } => self.on_session_refresh(at),
            Command::RefreshCalendar { at } => self.fetch_calendar(at),
            Command::SettingsLoaded { at, result } => self.on_settings_loaded(at, result),
            Command::CalendarLoaded { at, result } => self.on_calendar_loaded(at, result),
            Command::PersistenceSettled { session_id } => {
                self.pending_writes = self.pending_writes.saturating_sub(1);
                log::debug!("Stored session {session_id} ({} writes pending)", self.pending_writes);
            }
            Command::Status { reply } => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            Command::StartSession { request, at, reply } => {
                let result = self.start_session(request, at);
                self.respond(reply, result);
            }
            Command::PauseSession { at, reply } => {
                let result = self.pause_session(at);
                self.respond(reply, result);
            }
            Command::ResumeSession { at, reply } => {
                let result = self.resume_session(at);
                self.respond(reply, result);
            }
            Command::EndSession { notes, at, reply } => {
                let result = self.end_session(notes, at);
                self.respond(reply, result);
            }
            Command::RecordScreenshot { at, reply } => {
                let result = self.record_screenshot(at);
                self.respond(reply, result);
            }
            Command::DismissWarning { at, reply } => {
                let result = Ok(self.dismiss_warning(at));
                self.respond(reply, result);
            }
            Command::StartFocus { request, at, reply } => {
                let result = self.start_focus(request, at);
                self.respond(reply, result);
            }
            Command::PauseFocus { at, reply } => {
                let result = self.pause_focus(at);
                self.respond(reply, result);
            }
            Command::ResumeFocus { at, reply } => {
                let result = self.resume_focus(at);
                self.respond(reply, result);
            }
            Command::EndFocus { at, reply } => {
                let result = self.end_focus(at);
                self.respond(reply, result);
            }
            Command::Bypass { at, reply } => {
                let result = self.bypass(at);
                self.respond(reply, result);
            }
            Command::StayFocused { at, reply } => {
                let result = self.stay_focused(at);
                self.respond(reply, result);
            }
            Command::DismissBlock { at, reply } => {
                let result = self.dismiss_block(at);
                self.respond(reply, result);
            }
            Command::ConfirmCandidate {
                event_id,
                at,
                reply,
            } => {
                let result = self.confirm_candidate(&event_id, at);
                self.respond(reply, result);
            }
            Command::DismissCandidate { event_id, reply } => {
                let result = self.triggers.dismiss(&event_id);
                self.respond(reply, result);
            }
            Command::SnoozeCandidate {
                event_id,
                minutes,
                at,
                reply,
            } => {
                self.observe(at);
                let result = self.triggers.snooze(&event_id, minutes, at);
                self.respond(reply, result);
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(Ok(()));
                return false;
            }
        }
        true
    }

    /// Publish the new state before the caller hears back
    fn respond<T>(&self, reply: Reply<T>, result: EngineResult<T>) {
        self.publish();
        let _ = reply.send(result);
    }

    fn on_sample(&mut self, sample: ActivitySample) {
        self.observe(sample.timestamp);
        let events = self.presence.on_sample(&sample);
        self.apply_presence(events, sample.timestamp);
        self.sessions.note_sample(sample.has_user_input);
        self.last_sample = Some(sample);
    }

    fn on_tick(&mut self, at: DateTime<Utc>) {
        self.observe(at);
        let events = self.presence.tick(at);
        self.apply_presence(events, at);
        self.request_distraction_pass(at);
    }

    fn apply_presence(&mut self, events: Vec<PresenceEvent>, at: DateTime<Utc>) {
        for event in events {
            match event {
                PresenceEvent::WarningRaised(episode) => {
                    if self.sessions.on_afk_started(episode.idle_since) {
                        self.persist_current(PersistOp::Update);
                    }
                    self.emit(EngineEvent::WarningRaised { episode }, at);
                }
                PresenceEvent::AutoPauseRaised(episode) => {
                    let paused = self.sessions.on_auto_pause(episode.idle_since).cloned();
                    let session_id = paused.as_ref().map(|s| s.id);
                    self.emit(
                        EngineEvent::AutoPauseRaised {
                            episode,
                            session_id,
                        },
                        at,
                    );
                    if let Some(session) = paused {
                        self.persist(PersistOp::Update, session.clone());
                        self.emit(EngineEvent::SessionPaused(session), at);
                    }
                }
                PresenceEvent::Resumed {
                    episode,
                    resumed_at,
                    idle_seconds,
                } => {
                    if self.sessions.on_afk_ended(resumed_at) {
                        self.persist_current(PersistOp::Update);
                    }
                    self.emit(
                        EngineEvent::Resumed {
                            episode,
                            resumed_at,
                            idle_seconds,
                        },
                        at,
                    );
                }
            }
        }
    }

    fn request_distraction_pass(&mut self, at: DateTime<Utc>) {
        if !self.focus.is_blocking() {
            self.distraction.reset();
            return;
        }
        if self.last_sample.is_none() || self.settings_inflight {
            return;
        }

        self.settings_inflight = true;
        let source = self.collaborators.settings.clone();
        let tx = self.commands.clone();
        tokio::spawn(async move {
            let result = source.focus_settings().await.map_err(|e| format!("{e:#}"));
            let _ = tx.send(Command::SettingsLoaded { at, result }).await;
        });
    }

    fn on_settings_loaded(&mut self, at: DateTime<Utc>, result: Result<FocusSettings, String>) {
        self.settings_inflight = false;
        let settings = match result {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Could not read focus settings, skipping distraction check: {e}");
                return;
            }
        };

        if self.focus.is_blocking() {
            if let Some(sample) = self.last_sample.as_ref() {
                let focus_id = self.focus.current().map(|f| f.id);
                if let Some(decision) = self.distraction.evaluate(sample, &settings, focus_id, at) {
                    self.focus.record_distraction();
                    self.emit(EngineEvent::DistractionBlocked(decision), at);
                }
            }
        }
        self.settings = Some(settings);
    }

    fn on_session_refresh(&mut self, at: DateTime<Utc>) {
        self.observe(at);
        match self.sessions.refresh(at).cloned() {
            Some(session) => self.persist(PersistOp::Update, session),
            None => self.stop_refresh_timer(),
        }
    }

    fn fetch_calendar(&mut self, at: DateTime<Utc>) {
        let Some(calendar) = self.collaborators.calendar.clone() else {
            log::debug!("Calendar refresh requested without a calendar");
            return;
        };
        if self.calendar_inflight {
            return;
        }

        self.calendar_inflight = true;
        let window = self
            .config
            .calendar
            .window_minutes
            .max(self.config.focus.lead_window_minutes);
        let tx = self.commands.clone();
        tokio::spawn(async move {
            let result = calendar
                .get_upcoming_events(window)
                .await
                .map_err(|e| format!("{e:#}"));
            let _ = tx.send(Command::CalendarLoaded { at, result }).await;
        });
    }

    fn on_calendar_loaded(&mut self, at: DateTime<Utc>, result: Result<Vec<CalendarEvent>, String>) {
        self.calendar_inflight = false;
        match result {
            Ok(events) => {
                if !self.calendar_available {
                    log::info!("Calendar available");
                }
                self.calendar_available = true;
                self.calendar_synced_at = Some(at);
                for candidate in self.triggers.evaluate(at, &events) {
                    self.emit(EngineEvent::AutoStartCandidate(candidate), at);
                }
            }
            Err(e) => {
                if self.calendar_available {
                    log::warn!("Calendar unavailable, focus triggers paused: {e}");
                } else {
                    log::debug!("Calendar still unavailable: {e}");
                }
                self.calendar_available = false;
            }
        }
    }

    fn start_session(
        &mut self,
        request: StartSessionRequest,
        at: DateTime<Utc>,
    ) -> EngineResult<WorkSession> {
        self.observe(at);
        self.sessions.start(request, at)?;
        // Already idle past the warning threshold: bill nothing until input returns
        if let Some(idle_since) = self.presence.state().idle_since {
            self.sessions.on_afk_started(idle_since);
        }
        let session = self
            .sessions
            .current()
            .cloned()
            .ok_or_else(|| EngineError::NotFound("work session".to_string()))?;
        self.persist(PersistOp::Create, session.clone());
        self.start_refresh_timer();
        self.emit(EngineEvent::SessionStarted(session.clone()), at);
        Ok(session)
    }

    fn pause_session(&mut self, at: DateTime<Utc>) -> EngineResult<WorkSession> {
        self.observe(at);
        let session = self.sessions.pause(at)?.clone();
        self.persist(PersistOp::Update, session.clone());
        self.emit(EngineEvent::SessionPaused(session.clone()), at);
        Ok(session)
    }

    fn resume_session(&mut self, at: DateTime<Utc>) -> EngineResult<WorkSession> {
        self.observe(at);
        let session = self.sessions.resume(at)?.clone();
        self.persist(PersistOp::Update, session.clone());
        self.emit(EngineEvent::SessionResumed(session.clone()), at);
        Ok(session)
    }

    fn end_session(&mut self, notes: Option<String>, at: DateTime<Utc>) -> EngineResult<WorkSession> {
        self.observe(at);
        let session = self.sessions.end(notes, at)?.clone();
        self.persist(PersistOp::Close, session.clone());
        self.stop_refresh_timer();
        self.emit(EngineEvent::SessionEnded(session.clone()), at);
        Ok(session)
    }

    fn record_screenshot(&mut self, at: DateTime<Utc>) -> EngineResult<u32> {
        self.observe(at);
        let count = self.sessions.record_screenshot(at)?;
        self.persist_current(PersistOp::Update);
        Ok(count)
    }

    fn dismiss_warning(&mut self, at: DateTime<Utc>) -> bool {
        self.observe(at);
        match self.presence.dismiss_warning() {
            Some(episode) => {
                self.alerts.suppress(DedupeKey::afk_warning(episode.id), at);
                log::info!("AFK warning dismissed for episode {}", episode.id);
                true
            }
            None => false,
        }
    }

    fn start_focus(
        &mut self,
        request: StartFocusRequest,
        at: DateTime<Utc>,
    ) -> EngineResult<FocusSession> {
        self.observe(at);
        let focus = self.focus.start(request, at)?.clone();
        self.distraction.reset();
        self.emit(EngineEvent::FocusStarted(focus.clone()), at);
        Ok(focus)
    }

    fn pause_focus(&mut self, at: DateTime<Utc>) -> EngineResult<FocusSession> {
        self.observe(at);
        let focus = self.focus.pause()?.clone();
        self.distraction.reset();
        Ok(focus)
    }

    fn resume_focus(&mut self, at: DateTime<Utc>) -> EngineResult<FocusSession> {
        self.observe(at);
        Ok(self.focus.resume()?.clone())
    }

    fn end_focus(&mut self, at: DateTime<Utc>) -> EngineResult<FocusSession> {
        self.observe(at);
        let focus = self.focus.end(at)?.clone();
        self.distraction.reset();
        self.emit(EngineEvent::FocusEnded(focus.clone()), at);
        Ok(focus)
    }

    fn bypass(&mut self, at: DateTime<Utc>) -> EngineResult<BypassOutcome> {
        self.observe(at);
        let Some(block) = self.distraction.active_block() else {
            return Err(EngineError::NotFound("no active block".to_string()));
        };
        // The mode in force now, falling back to the one the block was raised under
        let mode = self
            .settings
            .as_ref()
            .map_or(block.mode, |settings| settings.blocking_mode);

        let outcome = self.distraction.apply_mode(mode, at)?;
        if let BypassOutcome::Bypassed(event) = &outcome {
            self.emit(EngineEvent::BlockResolved(event.clone()), at);
        }
        Ok(outcome)
    }

    fn stay_focused(&mut self, at: DateTime<Utc>) -> EngineResult<BypassEvent> {
        self.observe(at);
        let event = self.distraction.handle_stay_focused(at)?;
        self.emit(EngineEvent::BlockResolved(event.clone()), at);
        Ok(event)
    }

    fn dismiss_block(&mut self, at: DateTime<Utc>) -> EngineResult<BypassEvent> {
        self.observe(at);
        let event = self.distraction.dismiss_block(at)?;
        self.emit(EngineEvent::BlockResolved(event.clone()), at);
        Ok(event)
    }

    fn confirm_candidate(&mut self, event_id: &str, at: DateTime<Utc>) -> EngineResult<FocusSession> {
        self.observe(at);
        self.triggers.ensure_open(event_id, at)?;
        if let Some(running) = self.focus.current().filter(|f| f.is_running()) {
            return Err(EngineError::Conflict(format!(
                "focus session {} is already running",
                running.id
            )));
        }

        let candidate = self.triggers.confirm(event_id, at)?;
        let request = StartFocusRequest {
            title: Some(candidate.title),
            planned_minutes: Some(candidate.duration_minutes).filter(|m| *m > 0),
            source: FocusSource::Calendar {
                event_id: candidate.event_id,
            },
        };
        self.start_focus(request, at)
    }

    async fn restore_open_session(&mut self) {
        let stored = match self.collaborators.sessions.open_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(e) => {
                log::warn!("Could not load open session: {e:#}");
                return;
            }
        };

        match self.sessions.restore(stored) {
            Ok(session) => {
                let session = session.clone();
                self.observe(session.updated_at);
                self.persist(PersistOp::Update, session);
            }
            Err(e) => log::warn!("Could not restore open session: {e}"),
        }
    }

    fn spawn_timers(&mut self) {
        let cadence = self.config.cadence.clone();
        self.spawn_ticker(self.shutdown.child_token(), cadence.presence_tick(), || {
            Command::Tick { at: Utc::now() }
        });
        if self.collaborators.calendar.is_some() {
            self.spawn_ticker(self.shutdown.child_token(), cadence.focus_poll(), || {
                Command::RefreshCalendar { at: Utc::now() }
            });
        }
        if self.sessions.open_session().is_some() {
            self.start_refresh_timer();
        }
    }

    fn start_refresh_timer(&mut self) {
        if self.clocking != Clocking::Realtime || self.refresh_timer.is_some() {
            return;
        }
        let token = self.shutdown.child_token();
        self.spawn_ticker(token.clone(), self.config.cadence.session_refresh(), || {
            Command::SessionRefresh { at: Utc::now() }
        });
        self.refresh_timer = Some(token);
    }

    fn stop_refresh_timer(&mut self) {
        if let Some(token) = self.refresh_timer.take() {
            token.cancel();
        }
    }

    fn spawn_ticker<F>(&self, token: CancellationToken, every: Duration, make: F)
    where
        F: Fn() -> Command + Send + 'static,
    {
        let tx = self.commands.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(make()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn persist_current(&mut self, op: PersistOp) {
        if let Some(session) = self.sessions.current().cloned() {
            self.persist(op, session);
        }
    }

    fn persist(&mut self, op: PersistOp, session: WorkSession) {
        let id = session.id;
        match self.writer.as_ref() {
            Some(writer) if writer.submit(op, session) => self.pending_writes += 1,
            _ => log::error!("Persistence writer stopped, dropping {op:?} of session {id}"),
        }
    }

    fn emit(&mut self, event: EngineEvent, at: DateTime<Utc>) {
        if let Some(notification) = self.alerts.route(&event, at) {
            let sink = self.collaborators.notifier.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.dispatch(&notification).await {
                    log::warn!("Notification '{}' not delivered: {e:#}", notification.title);
                }
            });
        }
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn observe(&mut self, at: DateTime<Utc>) {
        self.clock = Some(self.clock.map_or(at, |clock| clock.max(at)));
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    fn snapshot(&self) -> EngineSnapshot {
        let as_of = self.now();
        EngineSnapshot {
            as_of,
            presence: self.presence.state(),
            session: self.sessions.current().cloned(),
            billable_seconds: self.sessions.billable_seconds(as_of),
            totals: self.sessions.totals(as_of),
            focus: self.focus.current().cloned(),
            active_block: self.distraction.active_block().cloned(),
            candidates: self.triggers.candidates(),
            current_app: self
                .last_sample
                .as_ref()
                .map(|sample| sample.foreground_app.clone()),
            calendar_enabled: self.triggers.is_enabled(),
            calendar_available: self.calendar_available,
            calendar_synced_at: self.calendar_synced_at,
            pending_writes: self.pending_writes,
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    async fn shutdown(&mut self) {
        log::info!("Engine shutting down");
        let now = self.now();
        if let Some(session) = self.sessions.refresh(now).cloned() {
            self.persist(PersistOp::Update, session);
        }
        self.stop_refresh_timer();
        if let Some(writer) = self.writer.take() {
            writer.close(SHUTDOWN_GRACE).await;
        }
        self.shutdown.cancel();
        self.publish();
    }
}

#[cfg(test)]
mod tests;
