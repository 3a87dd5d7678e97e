use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::helpers::{parse_datetime, parse_json, parse_uuid};
use super::Database;
use crate::models::{SessionStatus, WorkSession};

const SESSION_COLUMNS: &str = "id, status, started_at, ended_at, client_name, project_name,
     task_description, notes, paused_intervals, afk_intervals, screenshot_count,
     activity_level, billable_seconds, updated_at";

impl Database {
    /// Insert or overwrite a work session. Idempotent by session id.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database write fails
    pub fn upsert_work_session(&self, session: &WorkSession) -> Result<()> {
        let paused_json = serde_json::to_string(&session.paused_intervals)?;
        let afk_json = serde_json::to_string(&session.afk_intervals)?;
        let billable = session
            .billable_seconds
            .map(|secs| i64::try_from(secs).unwrap_or(i64::MAX));

        self.conn()?.execute(
            "INSERT INTO work_sessions (id, status, started_at, ended_at, client_name, project_name,
                                        task_description, notes, paused_intervals, afk_intervals,
                                        screenshot_count, activity_level, billable_seconds, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                status = ?2,
                ended_at = ?4,
                client_name = ?5,
                project_name = ?6,
                task_description = ?7,
                notes = ?8,
                paused_intervals = ?9,
                afk_intervals = ?10,
                screenshot_count = ?11,
                activity_level = ?12,
                billable_seconds = ?13,
                updated_at = ?14",
            params![
                session.id.to_string(),
                session.status.as_str(),
                session.started_at.to_rfc3339(),
                session.ended_at.map(|t| t.to_rfc3339()),
                session.client_name,
                session.project_name,
                session.task_description,
                session.notes,
                paused_json,
                afk_json,
                session.screenshot_count,
                session.activity_level,
                billable,
                session.updated_at.to_rfc3339(),
            ],
        )?;

        log::debug!(
            "Stored work session {} ({})",
            session.id,
            session.status
        );
        Ok(())
    }

    /// Get a work session by id
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_work_session(&self, id: Uuid) -> Result<Option<WorkSession>> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM work_sessions WHERE id = ?1"),
                params![id.to_string()],
                Self::row_to_work_session,
            )
            .optional()?;
        Ok(session)
    }

    /// Get the most recent session that has not ended
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_open_work_session(&self) -> Result<Option<WorkSession>> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM work_sessions
                     WHERE status != 'ended'
                     ORDER BY started_at DESC LIMIT 1"
                ),
                [],
                Self::row_to_work_session,
            )
            .optional()?;
        Ok(session)
    }

    /// List sessions, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn list_work_sessions(&self, limit: u32) -> Result<Vec<WorkSession>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM work_sessions ORDER BY started_at DESC LIMIT ?1"
        ))?;
        let sessions = stmt
            .query_map(params![limit], Self::row_to_work_session)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// List sessions that started inside `[start, end)`
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_work_sessions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WorkSession>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM work_sessions
             WHERE started_at >= ?1 AND started_at < ?2
             ORDER BY started_at ASC"
        ))?;
        let sessions = stmt
            .query_map(
                params![start.to_rfc3339(), end.to_rfc3339()],
                Self::row_to_work_session,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    fn row_to_work_session(row: &Row<'_>) -> rusqlite::Result<WorkSession> {
        let status_str: String = row.get(1)?;
        let status = SessionStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(1, status_str.clone(), rusqlite::types::Type::Text)
        })?;
        let ended_at = row
            .get::<_, Option<String>>(3)?
            .map(|s| parse_datetime(&s))
            .transpose()?;
        let billable_seconds = row
            .get::<_, Option<i64>>(12)?
            .map(|secs| u64::try_from(secs).unwrap_or(0));

        Ok(WorkSession {
            id: parse_uuid(&row.get::<_, String>(0)?)?,
            status,
            started_at: parse_datetime(&row.get::<_, String>(2)?)?,
            ended_at,
            client_name: row.get(4)?,
            project_name: row.get(5)?,
            task_description: row.get(6)?,
            notes: row.get(7)?,
            paused_intervals: parse_json(&row.get::<_, String>(8)?)?,
            afk_intervals: parse_json(&row.get::<_, String>(9)?)?,
            screenshot_count: row.get(10)?,
            activity_level: row.get(11)?,
            billable_seconds,
            updated_at: parse_datetime(&row.get::<_, String>(13)?)?,
        })
    }
}
