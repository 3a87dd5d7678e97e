use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vigil_storage::WorkSession;

use crate::distraction::{BlockDecision, BypassEvent};
use crate::focus_session::FocusSession;
use crate::focus_trigger::FocusAutoStartCandidate;
use crate::presence::AfkEpisode;

/// Everything the engine announces to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    WarningRaised {
        episode: AfkEpisode,
    },
    AutoPauseRaised {
        episode: AfkEpisode,
        session_id: Option<Uuid>,
    },
    Resumed {
        episode: AfkEpisode,
        resumed_at: DateTime<Utc>,
        idle_seconds: u64,
    },
    SessionStarted(WorkSession),
    SessionPaused(WorkSession),
    SessionResumed(WorkSession),
    SessionEnded(WorkSession),
    FocusStarted(FocusSession),
    FocusEnded(FocusSession),
    DistractionBlocked(BlockDecision),
    BlockResolved(BypassEvent),
    AutoStartCandidate(FocusAutoStartCandidate),
}
