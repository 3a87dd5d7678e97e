use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observation from the activity sampler, nominally once per second
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySample {
    pub timestamp: DateTime<Utc>,
    pub foreground_app: String,
    #[serde(default)]
    pub window_title: String,
    /// Active browser URL when the foreground app is a browser
    #[serde(default)]
    pub url: Option<String>,
    /// Keyboard or pointer input since the previous sample
    pub has_user_input: bool,
}

impl ActivitySample {
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, foreground_app: &str, has_user_input: bool) -> Self {
        Self {
            timestamp,
            foreground_app: foreground_app.to_string(),
            window_title: String::new(),
            url: None,
            has_user_input,
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    /// Parse one JSON line from a sample feed
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not a valid sample
    pub fn parse_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim()).context("Invalid activity sample")
    }
}
