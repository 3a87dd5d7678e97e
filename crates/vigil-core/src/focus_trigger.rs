//! Calendar-driven focus auto-start candidates.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::FocusConfig;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub duration_minutes: u32,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default = "default_event_status")]
    pub status: String,
    #[serde(default)]
    pub is_focus_time: bool,
}

fn default_event_status() -> String {
    "confirmed".to_string()
}

impl CalendarEvent {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status.eq_ignore_ascii_case("cancelled")
    }

    /// Duration in minutes, derived from the end time when not supplied
    #[must_use]
    pub fn minutes(&self) -> u32 {
        if self.duration_minutes > 0 {
            return self.duration_minutes;
        }
        u32::try_from((self.end_time - self.start_time).num_minutes()).unwrap_or(0)
    }
}

/// Read access to the user's calendar
#[async_trait]
pub trait CalendarConnector: Send + Sync {
    /// Events starting within the next `window_minutes`
    async fn get_upcoming_events(&self, window_minutes: u32) -> Result<Vec<CalendarEvent>>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusAutoStartCandidate {
    pub event_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub dismissed: bool,
    pub confirmed: bool,
    /// Emitted and waiting for an answer
    pub pending: bool,
    pub emissions: u32,
}

impl FocusAutoStartCandidate {
    fn from_event(event: &CalendarEvent) -> Self {
        Self {
            event_id: event.id.clone(),
            title: event.title.clone(),
            start_time: event.start_time,
            duration_minutes: event.minutes(),
            snoozed_until: None,
            dismissed: false,
            confirmed: false,
            pending: false,
            emissions: 0,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.dismissed || self.confirmed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerOptions {
    pub lead_window: Duration,
    pub auto_start: bool,
    pub focus_events_only: bool,
}

impl TriggerOptions {
    #[must_use]
    pub fn from_config(config: &FocusConfig) -> Self {
        Self {
            lead_window: Duration::minutes(i64::from(config.lead_window_minutes)),
            auto_start: config.auto_start_from_calendar,
            focus_events_only: config.focus_events_only,
        }
    }
}

#[derive(Debug)]
pub struct FocusTriggerEvaluator {
    enabled: bool,
    options: TriggerOptions,
    candidates: BTreeMap<String, FocusAutoStartCandidate>,
}

impl FocusTriggerEvaluator {
    #[must_use]
    pub const fn new(options: TriggerOptions) -> Self {
        Self {
            enabled: true,
            options,
            candidates: BTreeMap::new(),
        }
    }

    /// An evaluator with no calendar behind it
    #[must_use]
    pub const fn disabled(options: TriggerOptions) -> Self {
        Self {
            enabled: false,
            options,
            candidates: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn candidates(&self) -> Vec<FocusAutoStartCandidate> {
        self.candidates.values().cloned().collect()
    }

    /// Offer a candidate for each qualifying event inside the lead window.
    /// Returns the candidates emitted by this pass.
    pub fn evaluate(
        &mut self,
        now: DateTime<Utc>,
        events: &[CalendarEvent],
    ) -> Vec<FocusAutoStartCandidate> {
        if !self.enabled || !self.options.auto_start {
            return Vec::new();
        }

        let mut emitted = Vec::new();
        for event in events {
            if !self.qualifies(event) {
                continue;
            }
            let window_opens = event.start_time - self.options.lead_window;
            if now < window_opens || now > event.start_time {
                continue;
            }

            let candidate = self
                .candidates
                .entry(event.id.clone())
                .or_insert_with(|| FocusAutoStartCandidate::from_event(event));
            if candidate.is_terminal() || candidate.pending {
                continue;
            }
            candidate.title.clone_from(&event.title);
            candidate.start_time = event.start_time;
            candidate.duration_minutes = event.minutes();

            if let Some(until) = candidate.snoozed_until {
                if now < until {
                    continue;
                }
                candidate.snoozed_until = None;
            }

            candidate.pending = true;
            candidate.emissions += 1;
            log::info!(
                "Focus candidate for '{}' starting at {}",
                candidate.title,
                candidate.start_time
            );
            emitted.push(candidate.clone());
        }

        // Unanswered candidates expire with their event
        self.candidates.retain(|_, c| c.start_time >= now);
        emitted
    }

    /// Accept a candidate. Returns it so the caller can start the session.
    ///
    /// # Errors
    ///
    /// `Disabled` without a calendar, `NotFound` for unknown ids and
    /// `Conflict` if the candidate was already answered or its event started
    pub fn confirm(
        &mut self,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<FocusAutoStartCandidate> {
        let candidate = self.open_candidate(event_id, now)?;
        candidate.confirmed = true;
        candidate.pending = false;
        log::info!("Confirmed focus candidate {event_id}");
        Ok(candidate.clone())
    }

    /// Permanently dismiss a candidate
    ///
    /// # Errors
    ///
    /// `Disabled` without a calendar, `NotFound` for unknown ids and
    /// `Conflict` if the candidate was already answered
    pub fn dismiss(&mut self, event_id: &str) -> EngineResult<()> {
        self.ensure_known(event_id)?;
        let candidate = self
            .candidates
            .get_mut(event_id)
            .ok_or_else(|| EngineError::NotFound(format!("focus candidate {event_id}")))?;
        candidate.dismissed = true;
        candidate.pending = false;
        log::info!("Dismissed focus candidate {event_id}");
        Ok(())
    }

    /// Hide a candidate for `minutes`. Returns the time it may re-emit.
    ///
    /// # Errors
    ///
    /// `Disabled` without a calendar, `NotFound` for unknown ids and
    /// `Conflict` if the candidate was already answered or its event started
    pub fn snooze(
        &mut self,
        event_id: &str,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<DateTime<Utc>> {
        let candidate = self.open_candidate(event_id, now)?;
        let until = now + Duration::minutes(i64::from(minutes));
        candidate.snoozed_until = Some(until);
        candidate.pending = false;
        log::info!("Snoozed focus candidate {event_id} until {until}");
        Ok(until)
    }

    fn qualifies(&self, event: &CalendarEvent) -> bool {
        !event.is_cancelled()
            && !event.is_all_day
            && (!self.options.focus_events_only || event.is_focus_time)
    }

    /// Check that `event_id` names a candidate still awaiting an answer
    /// whose event has not started by `now`
    ///
    /// # Errors
    ///
    /// `Disabled` without a calendar, `NotFound` for unknown ids and
    /// `Conflict` if the candidate was already answered or its event started
    pub fn ensure_open(&self, event_id: &str, now: DateTime<Utc>) -> EngineResult<()> {
        let candidate = self.ensure_known(event_id)?;
        if now > candidate.start_time {
            return Err(EngineError::Conflict(format!(
                "event {event_id} already started at {}",
                candidate.start_time
            )));
        }
        Ok(())
    }

    fn ensure_known(&self, event_id: &str) -> EngineResult<&FocusAutoStartCandidate> {
        if !self.enabled {
            return Err(EngineError::Disabled(
                "calendar focus triggers are not configured".to_string(),
            ));
        }
        let candidate = self
            .candidates
            .get(event_id)
            .ok_or_else(|| EngineError::NotFound(format!("focus candidate {event_id}")))?;
        if candidate.is_terminal() {
            return Err(EngineError::Conflict(format!(
                "focus candidate {event_id} was already answered"
            )));
        }
        Ok(candidate)
    }

    fn open_candidate(
        &mut self,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<&mut FocusAutoStartCandidate> {
        self.ensure_open(event_id, now)?;
        self.candidates
            .get_mut(event_id)
            .ok_or_else(|| EngineError::NotFound(format!("focus candidate {event_id}")))
    }
}
