//! Calendar backend client
//!
//! Implements `CalendarConnector` on top of the backend's
//! `GET /api/calendar/events` endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::{header, Client};
use serde::Deserialize;
use vigil_core::config::CalendarConfig;
use vigil_core::{CalendarConnector, CalendarEvent};

use crate::http::ResponseExt;

/// Calendar API event response
#[derive(Debug, Deserialize)]
struct ApiEvent {
    id: String,
    title: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    duration_minutes: u32,
    #[serde(default)]
    is_all_day: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    is_focus_time: bool,
}

/// HTTP client for the calendar backend
pub struct HttpCalendarClient {
    client: Client,
    base_url: String,
}

impl HttpCalendarClient {
    /// Create a client for `base_url`, authenticating with `token` when given
    ///
    /// # Errors
    /// Returns an error if the token is not a valid header value or the HTTP client cannot be created
    pub fn new(base_url: &str, token: Option<&str>, timeout: std::time::Duration) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {token}"))
                    .context("Invalid token format")?,
            );
        }
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("vigil-focus-engine"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a client from config. `None` when no calendar URL is configured.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created
    pub fn from_config(config: &CalendarConfig) -> Result<Option<Self>> {
        let Some(base_url) = config.base_url.as_deref() else {
            return Ok(None);
        };
        let client = Self::new(
            base_url,
            config.api_token.as_deref(),
            std::time::Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Some(client))
    }

    fn events_url(&self) -> String {
        format!("{}/api/calendar/events", self.base_url)
    }

    /// Events starting within `window_minutes` of `now`, earliest first
    ///
    /// # Errors
    /// Returns an error if the request fails or the response cannot be parsed
    pub async fn upcoming_at(
        &self,
        now: DateTime<Utc>,
        window_minutes: u32,
    ) -> Result<Vec<CalendarEvent>> {
        let horizon = now + Duration::minutes(i64::from(window_minutes));
        let start_date = now.date_naive().to_string();
        let end_date = horizon.date_naive().to_string();

        let response = self
            .client
            .get(self.events_url())
            .query(&[("start_date", &start_date), ("end_date", &end_date)])
            .send()
            .await
            .context("Failed to reach calendar API")?
            .ensure_success("Calendar API")
            .await?;

        let events: Vec<ApiEvent> = response
            .json()
            .await
            .context("Failed to parse calendar events")?;

        let mut upcoming: Vec<CalendarEvent> = events
            .into_iter()
            .filter_map(|event| match Self::to_calendar_event(event) {
                Ok(event) => Some(event),
                Err(e) => {
                    log::warn!("Skipping calendar event: {e:#}");
                    None
                }
            })
            .collect();
        upcoming.retain(|event| event.start_time >= now && event.start_time <= horizon);
        upcoming.sort_by_key(|event| event.start_time);

        log::debug!(
            "Calendar returned {} events starting before {horizon}",
            upcoming.len()
        );
        Ok(upcoming)
    }

    fn to_calendar_event(event: ApiEvent) -> Result<CalendarEvent> {
        Ok(CalendarEvent {
            start_time: parse_timestamp(&event.start_time)
                .with_context(|| format!("Failed to parse start_time of event {}", event.id))?,
            end_time: parse_timestamp(&event.end_time)
                .with_context(|| format!("Failed to parse end_time of event {}", event.id))?,
            id: event.id,
            title: event.title,
            duration_minutes: event.duration_minutes,
            is_all_day: event.is_all_day,
            status: event.status.unwrap_or_else(|| "confirmed".to_string()),
            is_focus_time: event.is_focus_time,
        })
    }
}

/// Parse an RFC 3339 timestamp. Timestamps without an offset are taken as UTC.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .with_context(|| format!("Invalid timestamp '{value}'"))?;
    Ok(naive.and_utc())
}

#[async_trait]
impl CalendarConnector for HttpCalendarClient {
    async fn get_upcoming_events(&self, window_minutes: u32) -> Result<Vec<CalendarEvent>> {
        self.upcoming_at(Utc::now(), window_minutes).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
