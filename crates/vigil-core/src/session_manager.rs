//! Work session lifecycle and billable-time accounting.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use vigil_storage::{SessionStatus, TimeInterval, WorkSession};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub client_name: Option<String>,
    pub project_name: Option<String>,
    pub task_description: Option<String>,
}

/// Time breakdown of a session, in whole seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTotals {
    pub total_seconds: u64,
    pub paused_seconds: u64,
    /// AFK time not already covered by a pause
    pub idle_seconds: u64,
    pub billable_seconds: u64,
}

/// Compute the time breakdown of `session` as of `as_of`.
///
/// Pauses and AFK intervals are clipped to `[started_at, min(as_of, ended_at)]`
/// and their union is subtracted once, so overlaps are never counted twice.
#[must_use]
pub fn session_totals(session: &WorkSession, as_of: DateTime<Utc>) -> SessionTotals {
    let lo = session.started_at;
    let hi = session.ended_at.map_or(as_of, |ended| ended.min(as_of));
    if hi <= lo {
        return SessionTotals::default();
    }

    let total = hi - lo;
    let paused = union_length(session.paused_intervals.iter(), lo, hi);
    let excluded = union_length(
        session
            .paused_intervals
            .iter()
            .chain(session.afk_intervals.iter()),
        lo,
        hi,
    );

    SessionTotals {
        total_seconds: whole_seconds(total),
        paused_seconds: whole_seconds(paused),
        idle_seconds: whole_seconds(excluded - paused),
        billable_seconds: whole_seconds(total - excluded),
    }
}

/// Billable seconds of `session` as of `as_of`
#[must_use]
pub fn billable_seconds(session: &WorkSession, as_of: DateTime<Utc>) -> u64 {
    session_totals(session, as_of).billable_seconds
}

fn union_length<'a>(
    intervals: impl Iterator<Item = &'a TimeInterval>,
    lo: DateTime<Utc>,
    hi: DateTime<Utc>,
) -> Duration {
    let mut spans: Vec<_> = intervals.filter_map(|i| i.clipped(lo, hi)).collect();
    spans.sort_by_key(|(start, _)| *start);

    let mut total = Duration::zero();
    let mut current: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    for (start, end) in spans {
        current = match current {
            Some((cur_start, cur_end)) if start <= cur_end => Some((cur_start, cur_end.max(end))),
            Some((cur_start, cur_end)) => {
                total = total + (cur_end - cur_start);
                Some((start, end))
            }
            None => Some((start, end)),
        };
    }
    if let Some((start, end)) = current {
        total = total + (end - start);
    }
    total
}

fn whole_seconds(duration: Duration) -> u64 {
    u64::try_from(duration.num_seconds()).unwrap_or(0)
}

/// Owns the single current work session
#[derive(Debug, Default)]
pub struct SessionManager {
    session: Option<WorkSession>,
    samples_seen: u32,
    input_samples: u32,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current session, including one that has just ended
    #[must_use]
    pub const fn current(&self) -> Option<&WorkSession> {
        self.session.as_ref()
    }

    /// The current session if it is active or paused
    #[must_use]
    pub fn open_session(&self) -> Option<&WorkSession> {
        self.session.as_ref().filter(|s| s.is_open())
    }

    /// Start a new session at `now`
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a session is already active or paused
    pub fn start(
        &mut self,
        request: StartSessionRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<&WorkSession> {
        if let Some(open) = self.open_session() {
            return Err(EngineError::Conflict(format!(
                "session {} is already {}",
                open.id, open.status
            )));
        }

        let session = WorkSession::new(
            now,
            request.client_name,
            request.project_name,
            request.task_description,
        );
        log::info!("Started work session {}", session.id);
        self.samples_seen = 0;
        self.input_samples = 0;
        Ok(&*self.session.insert(session))
    }

    /// Pause the active session at `at`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` without a session, `Conflict` unless it is active,
    /// and `StaleOperation` if
    /// `at` precedes the session start or its last pause
    pub fn pause(&mut self, at: DateTime<Utc>) -> EngineResult<&WorkSession> {
        let session = self.active_mut()?;
        if at < session.started_at || session.last_pause_end().is_some_and(|end| at < end) {
            return Err(EngineError::StaleOperation(format!(
                "pause at {at} precedes recorded session time"
            )));
        }

        session.paused_intervals.push(TimeInterval::open(at));
        session.status = SessionStatus::Paused;
        session.updated_at = at;
        log::info!("Paused work session {}", session.id);
        Ok(&*session)
    }

    /// Resume the paused session at `at`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` without a session, `Conflict` unless it is paused,
    /// and `StaleOperation` if
    /// `at` precedes the start of the open pause
    pub fn resume(&mut self, at: DateTime<Utc>) -> EngineResult<&WorkSession> {
        let session = self.paused_mut()?;
        let Some(open) = session.paused_intervals.last_mut().filter(|i| i.is_open()) else {
            return Err(EngineError::Conflict(format!(
                "session {} has no open pause",
                session.id
            )));
        };
        if at < open.start {
            return Err(EngineError::StaleOperation(format!(
                "resume at {at} precedes pause start {}",
                open.start
            )));
        }

        open.end = Some(at);
        session.status = SessionStatus::Active;
        session.updated_at = at;
        log::info!("Resumed work session {}", session.id);
        Ok(&*session)
    }

    /// End the open session at `at`, closing any open pause or AFK interval
    ///
    /// # Errors
    ///
    /// Returns `NotFound` without a session, `Conflict` if it already ended,
    /// and `StaleOperation` if `at` precedes the session start or any
    /// recorded pause
    pub fn end(&mut self, notes: Option<String>, at: DateTime<Utc>) -> EngineResult<&WorkSession> {
        let activity_level = self.activity_level();
        let session = self.open_mut()?;
        let open_pause_start = session
            .paused_intervals
            .last()
            .filter(|i| i.is_open())
            .map(|i| i.start);
        let floor = [session.last_pause_end(), open_pause_start]
            .into_iter()
            .flatten()
            .fold(session.started_at, |floor, t| floor.max(t));
        if at < floor {
            return Err(EngineError::StaleOperation(format!(
                "end at {at} precedes recorded session time {floor}"
            )));
        }

        for interval in session
            .paused_intervals
            .iter_mut()
            .chain(session.afk_intervals.iter_mut())
            .filter(|i| i.is_open())
        {
            interval.end = Some(at.max(interval.start));
        }

        session.status = SessionStatus::Ended;
        session.ended_at = Some(at);
        session.notes = notes;
        session.activity_level = activity_level;
        session.updated_at = at;
        session.billable_seconds = Some(billable_seconds(&*session, at));
        log::info!(
            "Ended work session {} ({}s billable)",
            session.id,
            session.billable_seconds.unwrap_or(0)
        );
        Ok(&*session)
    }

    /// Open an AFK interval from `idle_since`. Returns true if one was opened.
    pub fn on_afk_started(&mut self, idle_since: DateTime<Utc>) -> bool {
        let Some(session) = self.session.as_mut().filter(|s| s.is_open()) else {
            return false;
        };
        if session.open_afk().is_some() {
            return false;
        }
        session
            .afk_intervals
            .push(TimeInterval::open(idle_since.max(session.started_at)));
        true
    }

    /// Close the open AFK interval at `at`. Returns true if one was closed.
    pub fn on_afk_ended(&mut self, at: DateTime<Utc>) -> bool {
        let Some(session) = self.session.as_mut().filter(|s| s.is_open()) else {
            return false;
        };
        let Some(open) = session.afk_intervals.last_mut().filter(|i| i.is_open()) else {
            return false;
        };
        open.end = Some(at.max(open.start));
        session.updated_at = at;
        true
    }

    /// Pause the active session because the user went idle at `idle_since`.
    /// The pause starts at the idle start, never before the session start or
    /// the end of the previous pause. Returns the session if it was paused.
    pub fn on_auto_pause(&mut self, idle_since: DateTime<Utc>) -> Option<&WorkSession> {
        let session = self
            .session
            .as_mut()
            .filter(|s| s.status == SessionStatus::Active)?;

        let floor = session
            .last_pause_end()
            .map_or(session.started_at, |end| end.max(session.started_at));
        let start = idle_since.max(floor);
        session.paused_intervals.push(TimeInterval::open(start));
        session.status = SessionStatus::Paused;
        session.updated_at = session.updated_at.max(start);
        log::info!("Auto-paused work session {} from {start}", session.id);
        Some(&*session)
    }

    /// Count a sample toward the activity level of an active session
    pub fn note_sample(&mut self, has_user_input: bool) {
        if self
            .session
            .as_ref()
            .is_some_and(|s| s.status == SessionStatus::Active)
        {
            self.samples_seen = self.samples_seen.saturating_add(1);
            if has_user_input {
                self.input_samples = self.input_samples.saturating_add(1);
            }
        }
    }

    /// Record that a screenshot was taken for the open session
    ///
    /// # Errors
    ///
    /// Returns `NotFound` without a session and `Conflict` if it already ended
    pub fn record_screenshot(&mut self, at: DateTime<Utc>) -> EngineResult<u32> {
        let session = self.open_mut()?;
        session.screenshot_count = session.screenshot_count.saturating_add(1);
        session.updated_at = session.updated_at.max(at);
        Ok(session.screenshot_count)
    }

    /// Fold sample counters into the session and touch `updated_at`.
    /// Returns the open session, if any.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> Option<&WorkSession> {
        let activity_level = self.activity_level();
        let session = self.session.as_mut().filter(|s| s.is_open())?;
        session.activity_level = activity_level;
        session.updated_at = session.updated_at.max(now);
        Some(&*session)
    }

    /// Billable seconds of the current session as of `as_of`, zero without one
    #[must_use]
    pub fn billable_seconds(&self, as_of: DateTime<Utc>) -> u64 {
        self.session
            .as_ref()
            .map_or(0, |session| billable_seconds(session, as_of))
    }

    #[must_use]
    pub fn totals(&self, as_of: DateTime<Utc>) -> Option<SessionTotals> {
        self.session
            .as_ref()
            .map(|session| session_totals(session, as_of))
    }

    /// Adopt a session recovered from storage. An active session is paused at
    /// its last recorded update so downtime is never billed.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a session is already open, or if the recovered
    /// session has already ended
    pub fn restore(&mut self, mut session: WorkSession) -> EngineResult<&WorkSession> {
        if let Some(open) = self.open_session() {
            return Err(EngineError::Conflict(format!(
                "session {} is already open",
                open.id
            )));
        }
        if !session.is_open() {
            return Err(EngineError::Conflict(format!(
                "session {} has already ended",
                session.id
            )));
        }

        let last_seen = session.updated_at.max(session.started_at);
        for afk in session.afk_intervals.iter_mut().filter(|i| i.is_open()) {
            afk.end = Some(last_seen.max(afk.start));
        }
        if session.status == SessionStatus::Active {
            let start = session
                .last_pause_end()
                .map_or(last_seen, |end| end.max(last_seen));
            session.paused_intervals.push(TimeInterval::open(start));
            session.status = SessionStatus::Paused;
            log::info!(
                "Restored work session {} paused from {start}",
                session.id
            );
        } else {
            log::info!("Restored paused work session {}", session.id);
        }

        self.samples_seen = 0;
        self.input_samples = 0;
        Ok(&*self.session.insert(session))
    }

    fn activity_level(&self) -> f64 {
        if self.samples_seen == 0 {
            return 0.0;
        }
        f64::from(self.input_samples) * 100.0 / f64::from(self.samples_seen)
    }

    fn open_mut(&mut self) -> EngineResult<&mut WorkSession> {
        match self.session.as_mut() {
            Some(session) if session.is_open() => Ok(session),
            Some(session) => Err(EngineError::Conflict(format!(
                "session {} has already ended",
                session.id
            ))),
            None => Err(EngineError::NotFound("no work session".to_string())),
        }
    }

    fn active_mut(&mut self) -> EngineResult<&mut WorkSession> {
        match self.session.as_mut() {
            Some(session) if session.status == SessionStatus::Active => Ok(session),
            Some(session) => Err(EngineError::Conflict(format!(
                "session {} is {}",
                session.id, session.status
            ))),
            None => Err(EngineError::NotFound("no work session".to_string())),
        }
    }

    fn paused_mut(&mut self) -> EngineResult<&mut WorkSession> {
        match self.session.as_mut() {
            Some(session) if session.status == SessionStatus::Paused => Ok(session),
            Some(session) => Err(EngineError::Conflict(format!(
                "session {} is {}",
                session.id, session.status
            ))),
            None => Err(EngineError::NotFound("no work session".to_string())),
        }
    }
}
