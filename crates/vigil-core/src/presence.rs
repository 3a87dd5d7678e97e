//! Presence detection from input activity.
//!
//! The detector counts time since the last sample carrying user input and
//! walks `Idle -> Active -> Warning -> AutoPaused`. Each idle episode fires
//! at most one warning and one auto-pause, even if ticks are missed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PresenceConfig;
use crate::sample::ActivitySample;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// No samples seen yet
    #[default]
    Idle,
    Active,
    Warning,
    AutoPaused,
}

/// Read-only view of the detector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub state: PresenceStatus,
    /// Time of the last input, set once an idle episode is open
    pub idle_since: Option<DateTime<Utc>>,
    /// Id of the open idle episode
    pub episode: Option<u64>,
    pub warning_dismissed: bool,
}

/// One continuous stretch without user input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AfkEpisode {
    pub id: u64,
    pub idle_since: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceEvent {
    WarningRaised(AfkEpisode),
    AutoPauseRaised(AfkEpisode),
    Resumed {
        episode: AfkEpisode,
        resumed_at: DateTime<Utc>,
        idle_seconds: u64,
    },
}

#[derive(Debug)]
pub struct PresenceDetector {
    warning_after: Duration,
    auto_pause_after: Duration,
    status: PresenceStatus,
    last_input_at: Option<DateTime<Utc>>,
    episode: Option<AfkEpisode>,
    next_episode_id: u64,
    auto_pause_raised: bool,
    warning_dismissed: bool,
}

impl PresenceDetector {
    #[must_use]
    pub fn new(warning_after: Duration, auto_pause_after: Duration) -> Self {
        Self {
            warning_after,
            auto_pause_after,
            status: PresenceStatus::Idle,
            last_input_at: None,
            episode: None,
            next_episode_id: 1,
            auto_pause_raised: false,
            warning_dismissed: false,
        }
    }

    #[must_use]
    pub fn from_config(config: &PresenceConfig) -> Self {
        Self::new(
            Duration::seconds(i64::try_from(config.warning_after_secs).unwrap_or(i64::MAX)),
            Duration::seconds(i64::try_from(config.auto_pause_after_secs).unwrap_or(i64::MAX)),
        )
    }

    #[must_use]
    pub fn state(&self) -> PresenceState {
        PresenceState {
            state: self.status,
            idle_since: self.episode.map(|e| e.idle_since),
            episode: self.episode.map(|e| e.id),
            warning_dismissed: self.warning_dismissed,
        }
    }

    /// Seconds since the last input as of `now`
    #[must_use]
    pub fn idle_seconds(&self, now: DateTime<Utc>) -> u64 {
        self.last_input_at
            .map_or(0, |last| u64::try_from((now - last).num_seconds()).unwrap_or(0))
    }

    /// Re-evaluate thresholds at `now`
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<PresenceEvent> {
        self.advance(now)
    }

    /// Feed a sample. Thresholds crossed before the sample's timestamp fire
    /// first, then user input closes any open episode.
    pub fn on_sample(&mut self, sample: &ActivitySample) -> Vec<PresenceEvent> {
        let mut events = self.advance(sample.timestamp);
        if !sample.has_user_input {
            return events;
        }

        if let Some(last) = self.last_input_at {
            if sample.timestamp < last {
                log::debug!(
                    "Ignoring out-of-order input sample at {} (last input {last})",
                    sample.timestamp
                );
                return events;
            }
        }

        if let Some(episode) = self.episode.take() {
            let idle_seconds =
                u64::try_from((sample.timestamp - episode.idle_since).num_seconds()).unwrap_or(0);
            log::info!("User returned after {idle_seconds}s idle");
            events.push(PresenceEvent::Resumed {
                episode,
                resumed_at: sample.timestamp,
                idle_seconds,
            });
        }

        self.last_input_at = Some(sample.timestamp);
        self.status = PresenceStatus::Active;
        self.auto_pause_raised = false;
        self.warning_dismissed = false;
        events
    }

    /// Acknowledge the current warning. Returns the episode it belonged to.
    /// The countdown keeps running.
    pub fn dismiss_warning(&mut self) -> Option<AfkEpisode> {
        let episode = self.episode?;
        self.warning_dismissed = true;
        Some(episode)
    }

    fn advance(&mut self, now: DateTime<Utc>) -> Vec<PresenceEvent> {
        let mut events = Vec::new();
        let Some(last_input) = self.last_input_at else {
            self.last_input_at = Some(now);
            self.status = PresenceStatus::Active;
            return events;
        };

        let idle = now - last_input;
        if idle >= self.warning_after && self.episode.is_none() {
            let episode = AfkEpisode {
                id: self.next_episode_id,
                idle_since: last_input,
            };
            self.next_episode_id += 1;
            self.episode = Some(episode);
            self.status = PresenceStatus::Warning;
            log::info!("No input for {}s, raising AFK warning", idle.num_seconds());
            events.push(PresenceEvent::WarningRaised(episode));
        }

        if idle >= self.auto_pause_after && !self.auto_pause_raised {
            if let Some(episode) = self.episode {
                self.auto_pause_raised = true;
                self.status = PresenceStatus::AutoPaused;
                log::info!("No input for {}s, auto-pausing", idle.num_seconds());
                events.push(PresenceEvent::AutoPauseRaised(episode));
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn detector() -> PresenceDetector {
        PresenceDetector::new(Duration::minutes(10), Duration::minutes(15))
    }

    fn input(secs: i64) -> ActivitySample {
        ActivitySample::new(at(secs), "Code", true)
    }

    #[test]
    fn test_idle_until_first_sample() {
        let mut presence = detector();
        assert_eq!(presence.state().state, PresenceStatus::Idle);

        assert!(presence.on_sample(&input(0)).is_empty());
        assert_eq!(presence.state().state, PresenceStatus::Active);
    }

    #[test]
    fn test_warning_then_auto_pause_fire_once() {
        let mut presence = detector();
        presence.on_sample(&input(0));

        let mut warnings = Vec::new();
        let mut pauses = Vec::new();
        for secs in 1..=960 {
            for event in presence.tick(at(secs)) {
                match event {
                    PresenceEvent::WarningRaised(_) => warnings.push(secs),
                    PresenceEvent::AutoPauseRaised(_) => pauses.push(secs),
                    PresenceEvent::Resumed { .. } => panic!("unexpected resume"),
                }
            }
        }

        assert_eq!(warnings, vec![600]);
        assert_eq!(pauses, vec![900]);
        assert_eq!(presence.state().state, PresenceStatus::AutoPaused);
        assert_eq!(presence.state().idle_since, Some(at(0)));
    }

    #[test]
    fn test_active_while_below_warning_threshold() {
        let mut presence = detector();
        presence.on_sample(&input(0));
        assert!(presence.tick(at(599)).is_empty());
        assert_eq!(presence.state().state, PresenceStatus::Active);
        assert!(presence.state().idle_since.is_none());
    }

    #[test]
    fn test_gap_fires_missed_events_in_order() {
        let mut presence = detector();
        presence.on_sample(&input(0));

        let events = presence.on_sample(&input(1200));
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], PresenceEvent::WarningRaised(_)));
        assert!(matches!(events[1], PresenceEvent::AutoPauseRaised(_)));
        match events[2] {
            PresenceEvent::Resumed {
                resumed_at,
                idle_seconds,
                ..
            } => {
                assert_eq!(resumed_at, at(1200));
                assert_eq!(idle_seconds, 1200);
            }
            _ => panic!("expected resume"),
        }
        assert_eq!(presence.state().state, PresenceStatus::Active);
    }

    #[test]
    fn test_input_below_threshold_emits_nothing() {
        let mut presence = detector();
        presence.on_sample(&input(0));
        assert!(presence.on_sample(&input(300)).is_empty());
        assert_eq!(presence.idle_seconds(at(310)), 10);
    }

    #[test]
    fn test_samples_without_input_do_not_reset_timer() {
        let mut presence = detector();
        presence.on_sample(&input(0));
        for secs in 1..600 {
            presence.on_sample(&ActivitySample::new(at(secs), "Code", false));
        }
        let events = presence.on_sample(&ActivitySample::new(at(600), "Code", false));
        assert!(matches!(events.as_slice(), [PresenceEvent::WarningRaised(_)]));
    }

    #[test]
    fn test_new_episode_after_resume() {
        let mut presence = detector();
        presence.on_sample(&input(0));
        let first = presence.tick(at(600));
        presence.on_sample(&input(700));
        let second = presence.tick(at(1300));

        let id_of = |events: &[PresenceEvent]| match events {
            [PresenceEvent::WarningRaised(ep)] => ep.id,
            _ => panic!("expected a single warning"),
        };
        assert_ne!(id_of(&first), id_of(&second));
    }

    #[test]
    fn test_dismiss_keeps_countdown_running() {
        let mut presence = detector();
        presence.on_sample(&input(0));
        assert!(presence.dismiss_warning().is_none());

        presence.tick(at(600));
        let episode = presence.dismiss_warning().unwrap();
        assert_eq!(episode.idle_since, at(0));
        assert!(presence.state().warning_dismissed);

        let events = presence.tick(at(900));
        assert!(matches!(events.as_slice(), [PresenceEvent::AutoPauseRaised(_)]));
    }

    #[test]
    fn test_stale_input_is_ignored() {
        let mut presence = detector();
        presence.on_sample(&input(100));
        presence.on_sample(&input(50));
        assert_eq!(presence.idle_seconds(at(110)), 10);
    }
}
