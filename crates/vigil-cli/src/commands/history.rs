use anyhow::Result;
use chrono::Local;
use std::path::PathBuf;
use tabled::{Table, Tabled};
use vigil_core::session_manager::session_totals;
use vigil_storage::{Database, WorkSession};

use super::helpers::{format_duration, truncate_str};

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Client")]
    client: String,
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Billable")]
    billable: String,
    #[tabled(rename = "Activity")]
    activity: String,
}

impl SessionRow {
    fn new(session: &WorkSession) -> Self {
        // Open sessions are shown as of their last stored update
        let billable = session
            .billable_seconds
            .unwrap_or_else(|| session_totals(session, session.updated_at).billable_seconds);
        Self {
            started: session
                .started_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            status: session.status.to_string(),
            client: session.client_name.clone().unwrap_or_default(),
            task: truncate_str(session.task_description.as_deref().unwrap_or(""), 30),
            billable: format_duration(billable),
            activity: format!("{:.0}%", session.activity_level),
        }
    }
}

pub fn show_history(limit: u32, db_path: Option<PathBuf>) -> Result<()> {
    let db = Database::new(db_path)?;
    let sessions = db.list_work_sessions(limit)?;

    if sessions.is_empty() {
        println!("No work sessions recorded yet.");
        return Ok(());
    }

    let total: u64 = sessions
        .iter()
        .filter_map(|session| session.billable_seconds)
        .sum();
    let rows: Vec<SessionRow> = sessions.iter().map(SessionRow::new).collect();

    let table = Table::new(rows).to_string();
    println!("\n{table}");
    println!("\nBillable time in ended sessions: {}", format_duration(total));

    Ok(())
}
