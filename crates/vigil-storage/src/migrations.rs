use anyhow::Result;
use rusqlite::Connection;

/// Initialize database schema
///
/// # Errors
///
/// Returns an error if table or index creation fails
pub fn init_schema(conn: &Connection) -> Result<()> {
    // Work sessions - one row per tracked session, rewritten on every transition
    conn.execute(
        "CREATE TABLE IF NOT EXISTS work_sessions (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            client_name TEXT,
            project_name TEXT,
            task_description TEXT,
            notes TEXT,
            paused_intervals TEXT NOT NULL DEFAULT '[]',
            afk_intervals TEXT NOT NULL DEFAULT '[]',
            screenshot_count INTEGER NOT NULL DEFAULT 0,
            activity_level REAL NOT NULL DEFAULT 0,
            billable_seconds INTEGER,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_work_sessions_status ON work_sessions(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_work_sessions_started ON work_sessions(started_at)",
        [],
    )?;

    // Focus settings - single row
    conn.execute(
        "CREATE TABLE IF NOT EXISTS focus_settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            blocking_mode TEXT NOT NULL,
            blocked_apps TEXT NOT NULL,
            blocked_websites TEXT NOT NULL,
            allowed_apps TEXT NOT NULL DEFAULT '[]',
            allowed_websites TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}
