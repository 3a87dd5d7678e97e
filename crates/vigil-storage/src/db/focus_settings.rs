use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::helpers::parse_json;
use super::Database;
use crate::models::{BlockingMode, FocusSettings};

impl Database {
    /// Get focus settings, writing the defaults on first use
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_focus_settings(&self) -> Result<FocusSettings> {
        let stored = {
            let conn = self.conn()?;
            let row = conn.query_row(
                "SELECT blocking_mode, blocked_apps, blocked_websites, allowed_apps, allowed_websites
                 FROM focus_settings WHERE id = 1",
                [],
                |row| {
                    let mode: String = row.get(0)?;
                    Ok(FocusSettings {
                        blocking_mode: BlockingMode::parse(&mode).unwrap_or_default(),
                        default_blocked_apps: parse_json(&row.get::<_, String>(1)?)?,
                        default_blocked_websites: parse_json(&row.get::<_, String>(2)?)?,
                        allowed_apps: parse_json(&row.get::<_, String>(3)?)?,
                        allowed_websites: parse_json(&row.get::<_, String>(4)?)?,
                    })
                },
            );
            row.optional()?
        };

        if let Some(settings) = stored {
            Ok(settings)
        } else {
            let settings = FocusSettings::default_settings();
            self.update_focus_settings(&settings)?;
            Ok(settings)
        }
    }

    /// Replace focus settings
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database write fails
    pub fn update_focus_settings(&self, settings: &FocusSettings) -> Result<()> {
        let blocked_apps = serde_json::to_string(&settings.default_blocked_apps)?;
        let blocked_websites = serde_json::to_string(&settings.default_blocked_websites)?;
        let allowed_apps = serde_json::to_string(&settings.allowed_apps)?;
        let allowed_websites = serde_json::to_string(&settings.allowed_websites)?;

        self.conn()?.execute(
            "INSERT INTO focus_settings (id, blocking_mode, blocked_apps, blocked_websites,
                                         allowed_apps, allowed_websites, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                blocking_mode = ?1,
                blocked_apps = ?2,
                blocked_websites = ?3,
                allowed_apps = ?4,
                allowed_websites = ?5,
                updated_at = ?6",
            params![
                settings.blocking_mode.as_str(),
                blocked_apps,
                blocked_websites,
                allowed_apps,
                allowed_websites,
                Utc::now().to_rfc3339(),
            ],
        )?;
        log::info!("Updated focus settings (mode: {})", settings.blocking_mode);
        Ok(())
    }
}
