//! Work session and AFK warning commands

use anyhow::Result;
use clap::Subcommand;
use vigil_core::ipc::{IpcRequest, IpcResponse};
use vigil_storage::WorkSession;

use super::helpers::{format_duration, local_time, send, unexpected};

#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// Start a billable work session
    Start {
        /// Client the time is billed to
        #[arg(long)]
        client: Option<String>,
        #[arg(long)]
        project: Option<String>,
        /// What you are working on
        #[arg(long)]
        task: Option<String>,
    },
    /// Pause the current session
    Pause,
    /// Resume a paused session
    Resume,
    /// End the current session
    End {
        /// Notes stored with the session
        #[arg(long)]
        notes: Option<String>,
    },
    /// Count a screenshot taken during the current session
    Screenshot,
}

#[derive(Subcommand, Debug)]
pub enum WarningAction {
    /// Silence the AFK warning for the current idle stretch
    Dismiss,
}

pub async fn handle_session_command(action: SessionAction) -> Result<()> {
    let request = match action {
        SessionAction::Screenshot => {
            return match send(IpcRequest::RecordScreenshot).await? {
                IpcResponse::Screenshots(count) => {
                    println!("Screenshots this session: {count}");
                    Ok(())
                }
                other => Err(unexpected(&other)),
            };
        }
        SessionAction::Start {
            client,
            project,
            task,
        } => IpcRequest::StartSession {
            client_name: client,
            project_name: project,
            task_description: task,
        },
        SessionAction::Pause => IpcRequest::PauseSession,
        SessionAction::Resume => IpcRequest::ResumeSession,
        SessionAction::End { notes } => IpcRequest::EndSession { notes },
    };

    match send(request).await? {
        IpcResponse::Session(session) => {
            print_session(&session);
            Ok(())
        }
        other => Err(unexpected(&other)),
    }
}

pub async fn handle_warning_command(action: WarningAction) -> Result<()> {
    match action {
        WarningAction::Dismiss => match send(IpcRequest::DismissWarning).await? {
            IpcResponse::WarningDismissed(true) => {
                println!("AFK warning dismissed.");
                Ok(())
            }
            IpcResponse::WarningDismissed(false) => {
                println!("No AFK warning is showing.");
                Ok(())
            }
            other => Err(unexpected(&other)),
        },
    }
}

fn print_session(session: &WorkSession) {
    println!("Session {} is {}", session.id, session.status);
    println!("  Started: {}", local_time(session.started_at));
    if let Some(client) = &session.client_name {
        println!("  Client:  {client}");
    }
    if let Some(project) = &session.project_name {
        println!("  Project: {project}");
    }
    if let Some(ended_at) = session.ended_at {
        println!("  Ended:   {}", local_time(ended_at));
    }
    if let Some(billable) = session.billable_seconds {
        println!("  Billable: {}", format_duration(billable));
        println!("  Activity: {:.0}%", session.activity_level);
    }
}
