pub mod alerts;
pub mod config;
pub mod daemon;
pub mod distraction;
pub mod engine;
pub mod error;
pub mod events;
pub mod focus_session;
pub mod focus_trigger;
pub mod handle;
pub mod ipc;
pub mod persistence;
pub mod presence;
pub mod sample;
pub mod session_manager;

pub use alerts::{AlertDispatcher, AlertKind, DedupeKey, Notification, NotificationSink};
pub use config::EngineConfig;
pub use daemon::Daemon;
pub use distraction::{BlockDecision, BypassEvent, BypassOutcome, SettingsSource};
pub use engine::{Clocking, Collaborators, Engine};
pub use error::{EngineError, EngineResult};
pub use events::EngineEvent;
pub use focus_session::{FocusSession, FocusSource, StartFocusRequest};
pub use focus_trigger::{CalendarConnector, CalendarEvent, FocusAutoStartCandidate};
pub use handle::{EngineHandle, EngineSnapshot};
pub use persistence::SessionStore;
pub use presence::{PresenceState, PresenceStatus};
pub use sample::ActivitySample;
pub use session_manager::{SessionTotals, StartSessionRequest};
