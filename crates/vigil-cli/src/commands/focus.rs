//! Focus mode, distraction block and calendar suggestion commands

use anyhow::Result;
use clap::Subcommand;
use vigil_core::{
    ipc::{IpcRequest, IpcResponse},
    BypassOutcome, FocusSession,
};

use super::helpers::{local_time, send, unexpected};

#[derive(Subcommand, Debug)]
pub enum FocusAction {
    /// Start a focus session
    Start {
        #[arg(long)]
        title: Option<String>,
        /// Planned length in minutes
        #[arg(short, long)]
        minutes: Option<u32>,
    },
    /// Pause blocking without ending the session
    Pause,
    /// Resume a paused focus session
    Resume,
    /// End the focus session
    End,
    /// Continue to the blocked item anyway
    Bypass,
    /// Close the block and stay focused
    Stay,
    /// Close the block without choosing
    Dismiss,
}

#[derive(Subcommand, Debug)]
pub enum CandidateAction {
    /// Start focus mode for the calendar event
    Confirm { event_id: String },
    /// Never suggest this event again
    Dismiss { event_id: String },
    /// Ask again later
    Snooze {
        event_id: String,
        /// Minutes to wait before asking again
        #[arg(short, long, default_value = "5")]
        minutes: u32,
    },
}

#[derive(Subcommand, Debug)]
pub enum CalendarAction {
    /// Fetch upcoming events now
    Refresh,
}

pub async fn handle_focus_command(action: FocusAction) -> Result<()> {
    let request = match action {
        FocusAction::Start { title, minutes } => IpcRequest::StartFocus {
            title,
            planned_minutes: minutes,
        },
        FocusAction::Pause => IpcRequest::PauseFocus,
        FocusAction::Resume => IpcRequest::ResumeFocus,
        FocusAction::End => IpcRequest::EndFocus,
        FocusAction::Bypass => IpcRequest::Bypass,
        FocusAction::Stay => IpcRequest::StayFocused,
        FocusAction::Dismiss => IpcRequest::DismissBlock,
    };

    match send(request).await? {
        IpcResponse::Focus(focus) => print_focus(&focus),
        IpcResponse::Bypass(BypassOutcome::Bypassed(event)) => {
            println!("Bypassed block on {}.", event.item);
        }
        IpcResponse::Bypass(BypassOutcome::Denied) => {
            println!("Strict mode: {} stays blocked until the focus session ends.", active_item().await?);
        }
        IpcResponse::BlockResolved(event) => {
            println!("Block on {} closed ({:?}).", event.item, event.resolution);
        }
        other => return Err(unexpected(&other)),
    }
    Ok(())
}

async fn active_item() -> Result<String> {
    match send(IpcRequest::Status).await? {
        IpcResponse::Status(snapshot) => Ok(snapshot
            .active_block
            .map_or_else(|| "the item".to_string(), |block| block.item)),
        other => Err(unexpected(&other)),
    }
}

pub async fn handle_candidate_command(action: CandidateAction) -> Result<()> {
    match action {
        CandidateAction::Confirm { event_id } => {
            match send(IpcRequest::ConfirmCandidate { event_id }).await? {
                IpcResponse::Focus(focus) => print_focus(&focus),
                other => return Err(unexpected(&other)),
            }
        }
        CandidateAction::Dismiss { event_id } => {
            match send(IpcRequest::DismissCandidate {
                event_id: event_id.clone(),
            })
            .await?
            {
                IpcResponse::Ok => println!("Dismissed suggestion for {event_id}."),
                other => return Err(unexpected(&other)),
            }
        }
        CandidateAction::Snooze { event_id, minutes } => {
            match send(IpcRequest::SnoozeCandidate {
                event_id: event_id.clone(),
                minutes,
            })
            .await?
            {
                IpcResponse::Snoozed { until } => {
                    println!("Snoozed {event_id} until {}.", local_time(until));
                }
                other => return Err(unexpected(&other)),
            }
        }
    }
    Ok(())
}

pub async fn handle_calendar_command(action: CalendarAction) -> Result<()> {
    match action {
        CalendarAction::Refresh => match send(IpcRequest::RefreshCalendar).await? {
            IpcResponse::Ok => {
                println!("Calendar refresh requested.");
                Ok(())
            }
            other => Err(unexpected(&other)),
        },
    }
}

fn print_focus(focus: &FocusSession) {
    println!("Focus \"{}\" is {}", focus.title, focus.status);
    println!(
        "  Started: {} ({} min planned)",
        local_time(focus.started_at),
        focus.planned_minutes
    );
    if focus.ended_at.is_some() {
        println!(
            "  Completed {} of {} min, {} distractions blocked",
            focus.completed_minutes, focus.planned_minutes, focus.distractions_blocked
        );
    }
}
