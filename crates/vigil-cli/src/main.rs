mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{
    config::ConfigAction,
    focus::{CalendarAction, CandidateAction, FocusAction},
    session::{SessionAction, WarningAction},
};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Presence-aware work sessions and focus blocking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine in the foreground, reading activity samples as JSON lines
    Run {
        /// Replay samples from a file instead of reading stdin
        #[arg(long)]
        feed: Option<PathBuf>,
        /// Database path (defaults to the data directory)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Write logs to vigil.log in the data directory
        #[arg(long)]
        log_file: bool,
    },
    /// Ask the running engine to shut down
    Stop,
    /// Show presence, session and focus status
    Status,
    /// Work session commands
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// AFK warning commands
    Warning {
        #[command(subcommand)]
        action: WarningAction,
    },
    /// Focus mode commands
    Focus {
        #[command(subcommand)]
        action: FocusAction,
    },
    /// Answer calendar focus suggestions
    Candidate {
        #[command(subcommand)]
        action: CandidateAction,
    },
    /// Calendar commands
    Calendar {
        #[command(subcommand)]
        action: CalendarAction,
    },
    /// Show recent work sessions
    History {
        /// Number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: u32,
        /// Database path (defaults to the data directory)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { log_file: true, .. } => commands::daemon::setup_file_logging()?,
        _ => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .format_timestamp_secs()
                .init();
        }
    }

    match cli.command {
        Commands::Run { feed, db, .. } => commands::daemon::run_daemon(feed, db).await,
        Commands::Stop => commands::daemon::stop_daemon().await,
        Commands::Status => commands::status::show_status().await,
        Commands::Session { action } => commands::session::handle_session_command(action).await,
        Commands::Warning { action } => commands::session::handle_warning_command(action).await,
        Commands::Focus { action } => commands::focus::handle_focus_command(action).await,
        Commands::Candidate { action } => commands::focus::handle_candidate_command(action).await,
        Commands::Calendar { action } => commands::focus::handle_calendar_command(action).await,
        Commands::History { limit, db } => commands::history::show_history(limit, db),
        Commands::Config { action } => commands::config::handle_config_command(action),
    }
}
