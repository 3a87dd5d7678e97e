//! Focus sessions gate distraction blocking. They are separate from work
//! sessions: a focus session can run with or without billable tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusSource {
    Manual,
    Calendar { event_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusStatus {
    Active,
    Paused,
    Completed,
}

impl FocusStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for FocusStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusSession {
    pub id: Uuid,
    pub title: String,
    pub source: FocusSource,
    pub status: FocusStatus,
    pub started_at: DateTime<Utc>,
    pub planned_minutes: u32,
    pub ended_at: Option<DateTime<Utc>>,
    pub distractions_blocked: u32,
    pub completed_minutes: u32,
    /// `completed_minutes / planned_minutes`, set when the session ends
    pub success_rate: f64,
}

impl FocusSession {
    #[must_use]
    pub const fn is_running(&self) -> bool {
        !matches!(self.status, FocusStatus::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartFocusRequest {
    pub title: Option<String>,
    pub planned_minutes: Option<u32>,
    pub source: FocusSource,
}

impl StartFocusRequest {
    #[must_use]
    pub const fn manual(title: Option<String>, planned_minutes: Option<u32>) -> Self {
        Self {
            title,
            planned_minutes,
            source: FocusSource::Manual,
        }
    }
}

#[derive(Debug)]
pub struct FocusSessionManager {
    session: Option<FocusSession>,
    default_minutes: u32,
}

impl FocusSessionManager {
    #[must_use]
    pub const fn new(default_minutes: u32) -> Self {
        Self {
            session: None,
            default_minutes,
        }
    }

    #[must_use]
    pub const fn current(&self) -> Option<&FocusSession> {
        self.session.as_ref()
    }

    /// Whether distraction blocking applies right now
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.status == FocusStatus::Active)
    }

    /// Start a focus session at `now`
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a focus session is already running
    pub fn start(
        &mut self,
        request: StartFocusRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<&FocusSession> {
        if let Some(running) = self.session.as_ref().filter(|s| s.is_running()) {
            return Err(EngineError::Conflict(format!(
                "focus session {} is already {}",
                running.id, running.status
            )));
        }

        let session = FocusSession {
            id: Uuid::new_v4(),
            title: request
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Focus Session".to_string()),
            source: request.source,
            status: FocusStatus::Active,
            started_at: now,
            planned_minutes: request.planned_minutes.unwrap_or(self.default_minutes),
            ended_at: None,
            distractions_blocked: 0,
            completed_minutes: 0,
            success_rate: 0.0,
        };
        log::info!(
            "Started focus session {} ({} min planned)",
            session.id,
            session.planned_minutes
        );
        Ok(&*self.session.insert(session))
    }

    /// # Errors
    ///
    /// Returns `NotFound` without a focus session and `Conflict` unless it is active
    pub fn pause(&mut self) -> EngineResult<&FocusSession> {
        let session = self.running_mut()?;
        if session.status != FocusStatus::Active {
            return Err(EngineError::Conflict(format!(
                "focus session {} is {}",
                session.id, session.status
            )));
        }
        session.status = FocusStatus::Paused;
        log::info!("Paused focus session {}", session.id);
        Ok(&*session)
    }

    /// # Errors
    ///
    /// Returns `NotFound` without a focus session and `Conflict` unless it is paused
    pub fn resume(&mut self) -> EngineResult<&FocusSession> {
        let session = self.running_mut()?;
        if session.status != FocusStatus::Paused {
            return Err(EngineError::Conflict(format!(
                "focus session {} is {}",
                session.id, session.status
            )));
        }
        session.status = FocusStatus::Active;
        log::info!("Resumed focus session {}", session.id);
        Ok(&*session)
    }

    /// Complete the running focus session at `now`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` without a running focus session
    pub fn end(&mut self, now: DateTime<Utc>) -> EngineResult<&FocusSession> {
        let session = self.running_mut()?;
        let elapsed_minutes = u32::try_from((now - session.started_at).num_minutes()).unwrap_or(0);

        session.completed_minutes = elapsed_minutes.min(session.planned_minutes);
        session.success_rate = if session.planned_minutes == 0 {
            0.0
        } else {
            f64::from(session.completed_minutes) / f64::from(session.planned_minutes)
        };
        session.status = FocusStatus::Completed;
        session.ended_at = Some(now);
        log::info!(
            "Completed focus session {} ({}/{} min, {} distractions blocked)",
            session.id,
            session.completed_minutes,
            session.planned_minutes,
            session.distractions_blocked
        );
        Ok(&*session)
    }

    /// Count a blocked distraction against the running session
    pub fn record_distraction(&mut self) {
        if let Some(session) = self.session.as_mut().filter(|s| s.is_running()) {
            session.distractions_blocked = session.distractions_blocked.saturating_add(1);
        }
    }

    fn running_mut(&mut self) -> EngineResult<&mut FocusSession> {
        self.session
            .as_mut()
            .filter(|s| s.is_running())
            .ok_or_else(|| EngineError::NotFound("no running focus session".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_start_uses_default_duration() {
        let mut focus = FocusSessionManager::new(50);
        let session = focus
            .start(StartFocusRequest::manual(None, None), at(0))
            .unwrap();
        assert_eq!(session.planned_minutes, 50);
        assert_eq!(session.title, "Focus Session");
        assert!(focus.is_blocking());
    }

    #[test]
    fn test_second_start_conflicts() {
        let mut focus = FocusSessionManager::new(50);
        focus
            .start(StartFocusRequest::manual(None, Some(25)), at(0))
            .unwrap();
        let err = focus
            .start(StartFocusRequest::manual(None, None), at(10))
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[test]
    fn test_pause_stops_blocking() {
        let mut focus = FocusSessionManager::new(50);
        focus
            .start(StartFocusRequest::manual(None, None), at(0))
            .unwrap();
        focus.pause().unwrap();
        assert!(!focus.is_blocking());
        assert!(matches!(focus.pause().unwrap_err(), EngineError::Conflict(_)));
        focus.resume().unwrap();
        assert!(focus.is_blocking());
    }

    #[test]
    fn test_end_computes_completion() {
        let mut focus = FocusSessionManager::new(50);
        focus
            .start(StartFocusRequest::manual(Some("Deep work".to_string()), Some(40)), at(0))
            .unwrap();
        focus.record_distraction();
        focus.record_distraction();

        let ended = focus.end(at(20 * 60 + 30)).unwrap();
        assert_eq!(ended.status, FocusStatus::Completed);
        assert_eq!(ended.completed_minutes, 20);
        assert!((ended.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(ended.distractions_blocked, 2);
        assert!(!focus.is_blocking());
    }

    #[test]
    fn test_completed_minutes_capped_at_plan() {
        let mut focus = FocusSessionManager::new(25);
        focus
            .start(StartFocusRequest::manual(None, None), at(0))
            .unwrap();
        let ended = focus.end(at(3600)).unwrap();
        assert_eq!(ended.completed_minutes, 25);
        assert!((ended.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_operations_without_session() {
        let mut focus = FocusSessionManager::new(50);
        assert!(matches!(focus.end(at(0)).unwrap_err(), EngineError::NotFound(_)));
        assert!(matches!(focus.pause().unwrap_err(), EngineError::NotFound(_)));

        focus
            .start(StartFocusRequest::manual(None, None), at(0))
            .unwrap();
        focus.end(at(60)).unwrap();
        assert!(matches!(focus.end(at(120)).unwrap_err(), EngineError::NotFound(_)));
        // A completed session does not block a new one
        focus
            .start(StartFocusRequest::manual(None, None), at(180))
            .unwrap();
    }
}
