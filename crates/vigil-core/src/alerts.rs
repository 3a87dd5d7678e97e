//! Turns engine events into user-facing notifications, once per episode.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vigil_storage::BlockingMode;

use crate::config::AlertConfig;
use crate::events::EngineEvent;

/// Destination for notifications. Delivery is best effort.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn dispatch(&self, notification: &Notification) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    AfkWarning,
    AutoPaused,
    DistractionBlocked,
    AutoStartCandidate,
    SessionEnded,
    FocusEnded,
}

/// `(kind, subject, episode)`: one notification per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupeKey {
    pub kind: AlertKind,
    pub subject: String,
    pub episode: String,
}

impl DedupeKey {
    #[must_use]
    pub fn new(kind: AlertKind, subject: impl Into<String>, episode: impl ToString) -> Self {
        Self {
            kind,
            subject: subject.into(),
            episode: episode.to_string(),
        }
    }

    /// Key of the AFK warning for idle episode `episode_id`
    #[must_use]
    pub fn afk_warning(episode_id: u64) -> Self {
        Self::new(AlertKind::AfkWarning, "presence", episode_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: AlertKind,
    pub title: String,
    pub body: String,
    pub dedupe_key: DedupeKey,
    pub fired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    pub kind: AlertKind,
    pub dedupe_key: DedupeKey,
    pub fired_at: DateTime<Utc>,
}

pub struct AlertDispatcher {
    records: HashMap<DedupeKey, NotificationRecord>,
    toggles: AlertConfig,
    retention: Duration,
}

impl AlertDispatcher {
    #[must_use]
    pub fn new(toggles: AlertConfig) -> Self {
        Self {
            records: HashMap::new(),
            toggles,
            retention: Duration::hours(24),
        }
    }

    /// Build the notification for `event`, unless its key was already seen
    /// or the kind is switched off.
    pub fn route(&mut self, event: &EngineEvent, now: DateTime<Utc>) -> Option<Notification> {
        let (key, title, body) = describe(event)?;
        self.prune(now);

        if self.records.contains_key(&key) {
            log::debug!("Suppressing duplicate {:?} notification", key.kind);
            return None;
        }
        self.record(key.clone(), now);

        if !self.enabled(key.kind) {
            log::debug!("{:?} notifications are switched off", key.kind);
            return None;
        }

        Some(Notification {
            kind: key.kind,
            title,
            body,
            dedupe_key: key,
            fired_at: now,
        })
    }

    /// Mark `key` as delivered without sending anything
    pub fn suppress(&mut self, key: DedupeKey, now: DateTime<Utc>) {
        self.record(key, now);
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    fn record(&mut self, key: DedupeKey, now: DateTime<Utc>) {
        self.records.entry(key.clone()).or_insert(NotificationRecord {
            kind: key.kind,
            dedupe_key: key,
            fired_at: now,
        });
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - self.retention;
        self.records.retain(|_, record| record.fired_at >= horizon);
    }

    const fn enabled(&self, kind: AlertKind) -> bool {
        match kind {
            AlertKind::AfkWarning => self.toggles.afk_warning,
            AlertKind::AutoPaused => self.toggles.auto_paused,
            AlertKind::DistractionBlocked => self.toggles.distraction_blocked,
            AlertKind::AutoStartCandidate => self.toggles.focus_candidate,
            AlertKind::SessionEnded => self.toggles.session_ended,
            AlertKind::FocusEnded => self.toggles.focus_ended,
        }
    }
}

fn describe(event: &EngineEvent) -> Option<(DedupeKey, String, String)> {
    let described = match event {
        EngineEvent::WarningRaised { episode } => (
            DedupeKey::afk_warning(episode.id),
            "Are you still there?".to_string(),
            format!(
                "No activity since {}. Your session will pause automatically soon.",
                episode.idle_since.format("%H:%M")
            ),
        ),
        EngineEvent::AutoPauseRaised {
            episode,
            session_id,
        } => (
            DedupeKey::new(
                AlertKind::AutoPaused,
                session_id.map_or_else(|| "presence".to_string(), |id| id.to_string()),
                episode.id,
            ),
            "Session paused".to_string(),
            format!(
                "You've been away since {}. Tracking is paused until you resume.",
                episode.idle_since.format("%H:%M")
            ),
        ),
        EngineEvent::DistractionBlocked(decision) => (
            DedupeKey::new(
                AlertKind::DistractionBlocked,
                decision
                    .focus_session_id
                    .map_or_else(|| "focus".to_string(), |id| id.to_string()),
                decision.id,
            ),
            distraction_title(decision.mode).to_string(),
            format!(
                "{} is on your block list during focus time.",
                decision.item
            ),
        ),
        EngineEvent::AutoStartCandidate(candidate) => (
            DedupeKey::new(
                AlertKind::AutoStartCandidate,
                candidate.event_id.clone(),
                candidate.emissions,
            ),
            "Start focus mode?".to_string(),
            format!(
                "'{}' starts at {} ({} min).",
                candidate.title,
                candidate.start_time.format("%H:%M"),
                candidate.duration_minutes
            ),
        ),
        EngineEvent::SessionEnded(session) => (
            DedupeKey::new(AlertKind::SessionEnded, session.id.to_string(), "end"),
            "Work session ended".to_string(),
            format!(
                "Billable time: {} min.",
                session.billable_seconds.unwrap_or(0) / 60
            ),
        ),
        EngineEvent::FocusEnded(focus) => (
            DedupeKey::new(AlertKind::FocusEnded, focus.id.to_string(), "end"),
            "Focus session complete".to_string(),
            format!(
                "{} of {} min focused, {} distractions blocked.",
                focus.completed_minutes, focus.planned_minutes, focus.distractions_blocked
            ),
        ),
        _ => return None,
    };
    Some(described)
}

const fn distraction_title(mode: BlockingMode) -> &'static str {
    match mode {
        BlockingMode::Strict => "Distraction Blocked",
        BlockingMode::Normal => "Distraction Warning",
        BlockingMode::Soft => "Focus Mode Reminder",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distraction::{BlockDecision, ItemType};
    use crate::presence::AfkEpisode;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn warning(id: u64) -> EngineEvent {
        EngineEvent::WarningRaised {
            episode: AfkEpisode {
                id,
                idle_since: at(0),
            },
        }
    }

    fn blocked(mode: BlockingMode) -> EngineEvent {
        EngineEvent::DistractionBlocked(BlockDecision {
            id: Uuid::new_v4(),
            item: "Slack".to_string(),
            item_type: ItemType::App,
            mode,
            focus_session_id: None,
            decided_at: at(0),
        })
    }

    #[test]
    fn test_dispatch_once_per_episode() {
        let mut alerts = AlertDispatcher::new(AlertConfig::default());
        assert!(alerts.route(&warning(1), at(600)).is_some());
        assert!(alerts.route(&warning(1), at(601)).is_none());
        assert!(alerts.route(&warning(1), at(700)).is_none());
        assert!(alerts.route(&warning(2), at(2000)).is_some());
    }

    #[test]
    fn test_suppressed_key_never_dispatches() {
        let mut alerts = AlertDispatcher::new(AlertConfig::default());
        alerts.suppress(DedupeKey::afk_warning(3), at(0));
        assert!(alerts.route(&warning(3), at(10)).is_none());
    }

    #[test]
    fn test_disabled_kind_recorded_not_sent() {
        let toggles = AlertConfig {
            afk_warning: false,
            ..AlertConfig::default()
        };
        let mut alerts = AlertDispatcher::new(toggles);
        assert!(alerts.route(&warning(1), at(0)).is_none());
        assert_eq!(alerts.record_count(), 1);
    }

    #[test]
    fn test_records_pruned_after_retention() {
        let mut alerts = AlertDispatcher::new(AlertConfig::default());
        alerts.route(&warning(1), at(0));
        alerts.route(&warning(2), at(25 * 3600));
        assert_eq!(alerts.record_count(), 1);
    }

    #[test]
    fn test_distraction_title_follows_mode() {
        let mut alerts = AlertDispatcher::new(AlertConfig::default());
        let strict = alerts.route(&blocked(BlockingMode::Strict), at(0)).unwrap();
        let normal = alerts.route(&blocked(BlockingMode::Normal), at(0)).unwrap();
        let soft = alerts.route(&blocked(BlockingMode::Soft), at(0)).unwrap();
        assert_eq!(strict.title, "Distraction Blocked");
        assert_eq!(normal.title, "Distraction Warning");
        assert_eq!(soft.title, "Focus Mode Reminder");
        assert!(soft.body.contains("Slack"));
    }

    #[test]
    fn test_non_alert_events_ignored() {
        let mut alerts = AlertDispatcher::new(AlertConfig::default());
        let resumed = EngineEvent::Resumed {
            episode: AfkEpisode {
                id: 1,
                idle_since: at(0),
            },
            resumed_at: at(900),
            idle_seconds: 900,
        };
        assert!(alerts.route(&resumed, at(900)).is_none());
        assert_eq!(alerts.record_count(), 0);
    }
}
