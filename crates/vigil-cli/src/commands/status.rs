use anyhow::Result;
use vigil_core::{
    daemon::socket_path,
    ipc::{IpcRequest, IpcResponse},
    EngineSnapshot, PresenceStatus,
};

use super::helpers::{format_duration, local_time, send, truncate_str, unexpected};

pub async fn show_status() -> Result<()> {
    if !socket_path()?.exists() {
        println!("Engine Status: Not running");
        return Ok(());
    }

    match send(IpcRequest::Status).await? {
        IpcResponse::Status(snapshot) => {
            print_snapshot(&snapshot);
            Ok(())
        }
        other => Err(unexpected(&other)),
    }
}

const fn presence_label(status: PresenceStatus) -> &'static str {
    match status {
        PresenceStatus::Idle => "waiting for activity",
        PresenceStatus::Active => "active",
        PresenceStatus::Warning => "away (warning shown)",
        PresenceStatus::AutoPaused => "away (auto-paused)",
    }
}

fn print_snapshot(snapshot: &EngineSnapshot) {
    println!("Engine Status: Running (as of {})", local_time(snapshot.as_of));

    let presence = &snapshot.presence;
    match presence.idle_since {
        Some(since) => println!(
            "Presence: {}, idle since {}",
            presence_label(presence.state),
            local_time(since)
        ),
        None => println!("Presence: {}", presence_label(presence.state)),
    }
    if let Some(app) = &snapshot.current_app {
        println!("Current app: {}", truncate_str(app, 40));
    }

    match (&snapshot.session, &snapshot.totals) {
        (Some(session), Some(totals)) => {
            println!("\nSession: {} ({})", session.id, session.status);
            if let Some(client) = &session.client_name {
                println!("  Client:   {client}");
            }
            println!("  Billable: {}", format_duration(snapshot.billable_seconds));
            println!("  Paused:   {}", format_duration(totals.paused_seconds));
            println!("  Away:     {}", format_duration(totals.idle_seconds));
        }
        _ => println!("\nSession: none"),
    }

    match &snapshot.focus {
        Some(focus) if focus.is_running() => {
            println!(
                "\nFocus: \"{}\" ({}, {} min planned, {} blocked)",
                focus.title, focus.status, focus.planned_minutes, focus.distractions_blocked
            );
        }
        _ => println!("\nFocus: off"),
    }
    if let Some(block) = &snapshot.active_block {
        let choice = if block.can_bypass() {
            "vigil focus bypass | stay"
        } else {
            "vigil focus stay"
        };
        println!(
            "  Blocked {} {} ({} mode): {choice}",
            block.item_type.as_str(),
            block.item,
            block.mode
        );
    }

    if !snapshot.calendar_enabled {
        println!("\nCalendar: not configured");
    } else if !snapshot.calendar_available {
        println!("\nCalendar: unavailable");
    } else {
        let synced = snapshot
            .calendar_synced_at
            .map_or_else(|| "never".to_string(), local_time);
        println!("\nCalendar: synced at {synced}");
    }
    for candidate in snapshot.candidates.iter().filter(|c| c.pending) {
        println!(
            "  Suggestion {}: \"{}\" at {} ({} min)",
            candidate.event_id,
            truncate_str(&candidate.title, 40),
            local_time(candidate.start_time),
            candidate.duration_minutes
        );
    }

    if snapshot.pending_writes > 0 {
        println!("\n{} session writes pending", snapshot.pending_writes);
    }
}
