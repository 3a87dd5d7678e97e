use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the local data directory for vigil.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_data_dir() -> Result<PathBuf> {
    let mut path =
        dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("Failed to get local data dir"))?;
    path.push("vigil");
    Ok(path)
}

/// Location of the TOML config file
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("config.toml"))
}

/// Engine configuration, loaded from `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub presence: PresenceConfig,
    pub cadence: CadenceConfig,
    pub focus: FocusConfig,
    pub alerts: AlertConfig,
    pub persistence: PersistenceConfig,
    pub calendar: CalendarConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub warning_after_secs: u64,
    pub auto_pause_after_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            warning_after_secs: 600,
            auto_pause_after_secs: 900,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    pub presence_tick_secs: u64,
    pub session_refresh_secs: u64,
    pub focus_poll_secs: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            presence_tick_secs: 1,
            session_refresh_secs: 5,
            focus_poll_secs: 60,
        }
    }
}

impl CadenceConfig {
    #[must_use]
    pub const fn presence_tick(&self) -> Duration {
        Duration::from_secs(self.presence_tick_secs)
    }

    #[must_use]
    pub const fn session_refresh(&self) -> Duration {
        Duration::from_secs(self.session_refresh_secs)
    }

    #[must_use]
    pub const fn focus_poll(&self) -> Duration {
        Duration::from_secs(self.focus_poll_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// How far ahead of a calendar event a candidate is offered
    pub lead_window_minutes: u32,
    pub auto_start_from_calendar: bool,
    /// Only offer events flagged as focus time
    pub focus_events_only: bool,
    pub default_focus_minutes: u32,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            lead_window_minutes: 10,
            auto_start_from_calendar: true,
            focus_events_only: false,
            default_focus_minutes: 50,
        }
    }
}

/// Per-kind notification toggles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct AlertConfig {
    pub afk_warning: bool,
    pub auto_paused: bool,
    pub distraction_blocked: bool,
    pub focus_candidate: bool,
    pub session_ended: bool,
    pub focus_ended: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            afk_warning: true,
            auto_paused: true,
            distraction_blocked: true,
            focus_candidate: true,
            session_ended: true,
            focus_ended: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// Base URL of the calendar API. No URL means calendar triggers are off.
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    /// Size of the look-ahead window requested from the calendar
    pub window_minutes: u32,
    pub timeout_secs: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            window_minutes: 60,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Notifications are POSTed here as JSON when set, otherwise logged
    pub webhook_url: Option<String>,
}

impl EngineConfig {
    /// Load config from `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the data dir is unavailable or the file is invalid
    pub fn load_default() -> Result<Self> {
        Self::load(&config_path()?)
    }

    /// Write config to `path`, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let raw = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, raw)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.presence.warning_after_secs == 0 {
            bail!("presence.warning_after_secs must be greater than zero");
        }
        if self.presence.auto_pause_after_secs <= self.presence.warning_after_secs {
            bail!(
                "presence.auto_pause_after_secs ({}) must be greater than warning_after_secs ({})",
                self.presence.auto_pause_after_secs,
                self.presence.warning_after_secs
            );
        }
        if self.cadence.presence_tick_secs == 0
            || self.cadence.session_refresh_secs == 0
            || self.cadence.focus_poll_secs == 0
        {
            bail!("cadence intervals must be greater than zero");
        }
        if self.persistence.initial_backoff_ms == 0 {
            bail!("persistence.initial_backoff_ms must be greater than zero");
        }
        if self.focus.default_focus_minutes == 0 {
            bail!("focus.default_focus_minutes must be greater than zero");
        }
        Ok(())
    }
}
