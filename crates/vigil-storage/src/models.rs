use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a work session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    /// Terminal. The session is immutable from here on.
    Ended,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Ended => "ended",
        }
    }

    /// Parse a stored status string
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        !matches!(self, Self::Ended)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A half-open span of wall-clock time. `end = None` means still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeInterval {
    #[must_use]
    pub const fn open(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }

    #[must_use]
    pub const fn closed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Clip the interval to `[lo, hi]`, treating an open end as `hi`.
    /// Returns `None` when nothing of the interval falls inside the window.
    #[must_use]
    pub fn clipped(&self, lo: DateTime<Utc>, hi: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.start.max(lo);
        let end = self.end.unwrap_or(hi).min(hi);
        (end > start).then_some((start, end))
    }
}

/// Work session - a tracked, billable period of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkSession {
    pub id: Uuid,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    /// Manual and auto pauses, time-ordered and non-overlapping
    pub paused_intervals: Vec<TimeInterval>,
    /// Idle time reported by presence detection, excluded from billing
    pub afk_intervals: Vec<TimeInterval>,
    pub ended_at: Option<DateTime<Utc>>,
    pub client_name: Option<String>,
    pub project_name: Option<String>,
    pub task_description: Option<String>,
    pub notes: Option<String>,
    pub screenshot_count: u32,
    /// Share of samples carrying user input while active (0-100)
    pub activity_level: f64,
    /// Set once the session has ended
    pub billable_seconds: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl WorkSession {
    #[must_use]
    pub fn new(
        started_at: DateTime<Utc>,
        client_name: Option<String>,
        project_name: Option<String>,
        task_description: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: SessionStatus::Active,
            started_at,
            paused_intervals: Vec::new(),
            afk_intervals: Vec::new(),
            ended_at: None,
            client_name,
            project_name,
            task_description,
            notes: None,
            screenshot_count: 0,
            activity_level: 0.0,
            billable_seconds: None,
            updated_at: started_at,
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// The currently open pause, if any
    #[must_use]
    pub fn open_pause(&self) -> Option<&TimeInterval> {
        self.paused_intervals.last().filter(|i| i.is_open())
    }

    /// The currently open AFK interval, if any
    #[must_use]
    pub fn open_afk(&self) -> Option<&TimeInterval> {
        self.afk_intervals.last().filter(|i| i.is_open())
    }

    /// Latest instant already covered by a closed pause
    #[must_use]
    pub fn last_pause_end(&self) -> Option<DateTime<Utc>> {
        self.paused_intervals.iter().filter_map(|i| i.end).max()
    }
}

/// Distraction enforcement policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingMode {
    /// Reminder only, bypass allowed
    #[default]
    Soft,
    /// Warning, bypass allowed
    #[serde(alias = "hard")]
    Normal,
    /// No bypass
    Strict,
}

impl BlockingMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Normal => "normal",
            Self::Strict => "strict",
        }
    }

    /// Parse a mode string. `hard` is accepted as an older name for `normal`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "soft" => Some(Self::Soft),
            "normal" | "hard" => Some(Self::Normal),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }

    #[must_use]
    pub const fn can_bypass(&self) -> bool {
        !matches!(self, Self::Strict)
    }
}

impl std::fmt::Display for BlockingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Focus-mode blocking preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusSettings {
    pub blocking_mode: BlockingMode,
    pub default_blocked_apps: Vec<String>,
    pub default_blocked_websites: Vec<String>,
    /// Exceptions that are never blocked
    pub allowed_apps: Vec<String>,
    pub allowed_websites: Vec<String>,
}

impl FocusSettings {
    #[must_use]
    pub fn default_settings() -> Self {
        let to_vec = |items: &[&str]| items.iter().map(ToString::to_string).collect();
        Self {
            blocking_mode: BlockingMode::Soft,
            default_blocked_apps: to_vec(&[
                "Slack",
                "Discord",
                "Messages",
                "Mail",
                "Telegram",
                "WhatsApp",
                "Messenger",
                "Twitter",
                "Facebook",
            ]),
            default_blocked_websites: to_vec(&[
                "twitter.com",
                "x.com",
                "facebook.com",
                "instagram.com",
                "reddit.com",
                "youtube.com",
                "tiktok.com",
                "netflix.com",
                "twitch.tv",
                "discord.com",
            ]),
            allowed_apps: Vec::new(),
            allowed_websites: Vec::new(),
        }
    }
}

impl Default for FocusSettings {
    fn default() -> Self {
        Self::default_settings()
    }
}
