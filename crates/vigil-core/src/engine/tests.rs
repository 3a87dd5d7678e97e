use super::*;
use crate::alerts::{AlertKind, Notification};
use crate::distraction::BlockResolution;
use crate::focus_session::FocusStatus;
use crate::presence::PresenceStatus;
use anyhow::Result;
use async_trait::async_trait;
use chrono::TimeZone;
use std::sync::Mutex;
use vigil_storage::{BlockingMode, Database, SessionStatus, TimeInterval};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    fn kinds(&self) -> Vec<AlertKind> {
        self.sent.lock().unwrap().iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct StaticCalendar {
    events: Vec<CalendarEvent>,
}

#[async_trait]
impl CalendarConnector for StaticCalendar {
    async fn get_upcoming_events(&self, _window_minutes: u32) -> Result<Vec<CalendarEvent>> {
        Ok(self.events.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

fn standup(start: i64) -> CalendarEvent {
    CalendarEvent {
        id: "evt-1".to_string(),
        title: "Deep work block".to_string(),
        start_time: at(start),
        end_time: at(start + 30 * 60),
        duration_minutes: 30,
        is_all_day: false,
        status: "confirmed".to_string(),
        is_focus_time: true,
    }
}

struct Harness {
    handle: EngineHandle,
    db: Arc<Database>,
    sink: Arc<RecordingSink>,
}

async fn harness_with(db: Database, calendar: Option<Arc<dyn CalendarConnector>>) -> Harness {
    let db = Arc::new(db);
    let sink = Arc::new(RecordingSink::default());
    let collaborators = Collaborators {
        sessions: db.clone(),
        settings: db.clone(),
        calendar,
        notifier: sink.clone(),
    };
    let handle = Engine::start(EngineConfig::default(), collaborators, Clocking::Manual).await;
    Harness { handle, db, sink }
}

async fn harness() -> Harness {
    harness_with(Database::open_in_memory().unwrap(), None).await
}

/// Poll `check` until it holds or a couple of seconds pass
async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn settled(handle: &EngineHandle) {
    for _ in 0..200 {
        if handle.status().await.unwrap().pending_writes == 0 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("writes still pending");
}

async fn next_matching(
    events: &mut broadcast::Receiver<EngineEvent>,
    mut wanted: impl FnMut(&EngineEvent) -> bool,
) -> EngineEvent {
    let wait = async {
        loop {
            let event = events.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(2), wait)
        .await
        .unwrap()
}

fn drain(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn test_pause_resume_end_bills_1500_seconds() {
    let h = harness().await;
    let session = h
        .handle
        .start_session(StartSessionRequest::default(), at(0))
        .await
        .unwrap();
    h.handle.pause_session(at(600)).await.unwrap();
    h.handle.resume_session(at(900)).await.unwrap();
    let ended = h.handle.end_session(None, at(1800)).await.unwrap();
    assert_eq!(ended.billable_seconds, Some(1500));

    settled(&h.handle).await;
    let stored = h.db.get_work_session(session.id).unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Ended);
    assert_eq!(stored.billable_seconds, Some(1500));
    assert_eq!(
        stored.paused_intervals,
        vec![TimeInterval::closed(at(600), at(900))]
    );
}

#[tokio::test]
async fn test_sixteen_idle_minutes_auto_pause_once() {
    let h = harness().await;
    let mut events = h.handle.subscribe();
    h.handle
        .start_session(StartSessionRequest::default(), at(0))
        .await
        .unwrap();

    for secs in 0..=60 {
        h.handle
            .push_sample(ActivitySample::new(at(secs), "Code", true))
            .await
            .unwrap();
    }
    for secs in 61..=(60 + 16 * 60) {
        h.handle.tick(at(secs)).await.unwrap();
    }

    let snapshot = h.handle.status().await.unwrap();
    assert_eq!(snapshot.presence.state, PresenceStatus::AutoPaused);
    let session = snapshot.session.unwrap();
    assert_eq!(session.status, SessionStatus::Paused);
    assert_eq!(session.open_pause().unwrap().start, at(60));
    assert_eq!(snapshot.billable_seconds, 60);

    let seen = drain(&mut events);
    let warnings = seen
        .iter()
        .filter(|e| matches!(e, EngineEvent::WarningRaised { .. }))
        .count();
    let pauses: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            EngineEvent::AutoPauseRaised { session_id, .. } => Some(*session_id),
            _ => None,
        })
        .collect();
    assert_eq!(warnings, 1);
    assert_eq!(pauses, vec![Some(session.id)]);

    let sink = h.sink.clone();
    eventually(|| sink.kinds().len() >= 2).await;
    let kinds = h.sink.kinds();
    assert_eq!(
        kinds.iter().filter(|k| **k == AlertKind::AfkWarning).count(),
        1
    );
    assert_eq!(
        kinds.iter().filter(|k| **k == AlertKind::AutoPaused).count(),
        1
    );
}

#[tokio::test]
async fn test_gap_recovery_keeps_session_paused() {
    let h = harness().await;
    h.handle
        .start_session(StartSessionRequest::default(), at(0))
        .await
        .unwrap();
    h.handle
        .push_sample(ActivitySample::new(at(100), "Code", true))
        .await
        .unwrap();
    // Laptop lid closed for twenty minutes
    h.handle
        .push_sample(ActivitySample::new(at(1300), "Code", true))
        .await
        .unwrap();

    let snapshot = h.handle.status().await.unwrap();
    assert_eq!(snapshot.presence.state, PresenceStatus::Active);
    let session = snapshot.session.unwrap();
    assert_eq!(session.status, SessionStatus::Paused);
    assert_eq!(session.afk_intervals, vec![TimeInterval::closed(at(100), at(1300))]);
    assert_eq!(snapshot.billable_seconds, 100);

    // Explicit resume bills again from here
    h.handle.resume_session(at(1400)).await.unwrap();
    assert_eq!(h.handle.status().await.unwrap().billable_seconds, 100);
    h.handle.tick(at(1500)).await.unwrap();
    assert_eq!(h.handle.status().await.unwrap().billable_seconds, 200);
}

#[tokio::test]
async fn test_session_started_while_away_excludes_idle_time() {
    let h = harness().await;
    h.handle
        .push_sample(ActivitySample::new(at(0), "Code", true))
        .await
        .unwrap();
    h.handle.tick(at(650)).await.unwrap();
    assert_eq!(
        h.handle.status().await.unwrap().presence.state,
        PresenceStatus::Warning
    );

    let started = h
        .handle
        .start_session(StartSessionRequest::default(), at(700))
        .await
        .unwrap();
    assert_eq!(started.afk_intervals, vec![TimeInterval::open(at(700))]);

    h.handle
        .push_sample(ActivitySample::new(at(850), "Code", true))
        .await
        .unwrap();
    let ended = h.handle.end_session(None, at(1000)).await.unwrap();
    assert_eq!(
        ended.afk_intervals,
        vec![TimeInterval::closed(at(700), at(850))]
    );
    assert_eq!(ended.billable_seconds, Some(150));
}

#[tokio::test]
async fn test_conflicts_surface_to_caller() {
    let h = harness().await;
    h.handle
        .start_session(StartSessionRequest::default(), at(0))
        .await
        .unwrap();
    let err = h
        .handle
        .start_session(StartSessionRequest::default(), at(5))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    h.handle.pause_session(at(10)).await.unwrap();
    let err = h.handle.pause_session(at(20)).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let err = h.handle.resume_session(at(5)).await.unwrap_err();
    assert!(matches!(err, EngineError::StaleOperation(_)));
}

#[tokio::test]
async fn test_strict_bypass_denied_stay_focused_allowed() {
    let db = Database::open_in_memory().unwrap();
    let mut settings = db.get_focus_settings().unwrap();
    settings.blocking_mode = BlockingMode::Strict;
    db.update_focus_settings(&settings).unwrap();

    let h = harness_with(db, None).await;
    let mut events = h.handle.subscribe();
    let focus = h
        .handle
        .start_focus(StartFocusRequest::manual(None, Some(25)), at(0))
        .await
        .unwrap();

    h.handle
        .push_sample(ActivitySample::new(at(1), "Slack", true))
        .await
        .unwrap();
    h.handle.tick(at(1)).await.unwrap();

    let blocked = next_matching(&mut events, |e| {
        matches!(e, EngineEvent::DistractionBlocked(_))
    })
    .await;
    let EngineEvent::DistractionBlocked(decision) = blocked else {
        unreachable!()
    };
    assert_eq!(decision.item, "Slack");
    assert_eq!(decision.focus_session_id, Some(focus.id));

    let outcome = h.handle.bypass(at(2)).await.unwrap();
    assert_eq!(outcome, BypassOutcome::Denied);
    assert!(h.handle.status().await.unwrap().active_block.is_some());

    let resolved = h.handle.stay_focused(at(3)).await.unwrap();
    assert_eq!(resolved.resolution, BlockResolution::StayedFocused);

    let snapshot = h.handle.status().await.unwrap();
    assert!(snapshot.active_block.is_none());
    assert_eq!(snapshot.focus.unwrap().distractions_blocked, 1);

    let sink = h.sink.clone();
    eventually(|| sink.kinds().contains(&AlertKind::DistractionBlocked)).await;
    let title = h.sink.sent.lock().unwrap()[0].title.clone();
    assert_eq!(title, "Distraction Blocked");
}

#[tokio::test]
async fn test_no_blocking_without_focus_session() {
    let h = harness().await;
    let mut events = h.handle.subscribe();
    h.handle
        .push_sample(ActivitySample::new(at(0), "Slack", true))
        .await
        .unwrap();
    h.handle.tick(at(1)).await.unwrap();
    h.handle
        .start_session(StartSessionRequest::default(), at(2))
        .await
        .unwrap();
    h.handle.tick(at(3)).await.unwrap();

    let snapshot = h.handle.status().await.unwrap();
    assert!(snapshot.active_block.is_none());
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::DistractionBlocked(_))));
}

#[tokio::test]
async fn test_ending_focus_clears_block() {
    let h = harness().await;
    let mut events = h.handle.subscribe();
    h.handle
        .start_focus(StartFocusRequest::manual(None, None), at(0))
        .await
        .unwrap();
    h.handle
        .push_sample(
            ActivitySample::new(at(1), "Firefox", true).with_url("https://reddit.com/r/rust"),
        )
        .await
        .unwrap();
    h.handle.tick(at(1)).await.unwrap();
    next_matching(&mut events, |e| {
        matches!(e, EngineEvent::DistractionBlocked(_))
    })
    .await;

    // Soft mode by default, so bypass goes through
    let outcome = h.handle.bypass(at(2)).await.unwrap();
    assert!(matches!(outcome, BypassOutcome::Bypassed(_)));

    let ended = h.handle.end_focus(at(600)).await.unwrap();
    assert_eq!(ended.status, FocusStatus::Completed);
    assert_eq!(ended.completed_minutes, 10);
    assert!(h.handle.status().await.unwrap().active_block.is_none());
}

#[tokio::test]
async fn test_calendar_candidate_snooze_and_confirm() {
    let calendar: Arc<dyn CalendarConnector> = Arc::new(StaticCalendar {
        events: vec![standup(300)],
    });
    let h = harness_with(Database::open_in_memory().unwrap(), Some(calendar)).await;
    let mut events = h.handle.subscribe();

    h.handle.refresh_calendar(at(0)).await.unwrap();
    let first = next_matching(&mut events, |e| {
        matches!(e, EngineEvent::AutoStartCandidate(_))
    })
    .await;
    let EngineEvent::AutoStartCandidate(candidate) = first else {
        unreachable!()
    };
    assert_eq!(candidate.event_id, "evt-1");

    let until = h
        .handle
        .snooze_candidate("evt-1", 5, at(0))
        .await
        .unwrap();
    assert_eq!(until, at(300));

    // Inside the snooze window nothing is offered
    h.handle.refresh_calendar(at(120)).await.unwrap();
    let handle = h.handle.clone();
    for _ in 0..200 {
        if handle.status().await.unwrap().calendar_synced_at == Some(at(120)) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::AutoStartCandidate(_))));

    // Snooze over and the event has not started yet
    h.handle.refresh_calendar(at(300)).await.unwrap();
    let again = next_matching(&mut events, |e| {
        matches!(e, EngineEvent::AutoStartCandidate(_))
    })
    .await;
    let EngineEvent::AutoStartCandidate(candidate) = again else {
        unreachable!()
    };
    assert_eq!(candidate.emissions, 2);

    let focus = h.handle.confirm_candidate("evt-1", at(300)).await.unwrap();
    assert_eq!(focus.planned_minutes, 30);
    assert_eq!(
        focus.source,
        FocusSource::Calendar {
            event_id: "evt-1".to_string()
        }
    );

    let err = h
        .handle
        .confirm_candidate("evt-1", at(301))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn test_confirm_conflicts_with_running_focus() {
    let calendar: Arc<dyn CalendarConnector> = Arc::new(StaticCalendar {
        events: vec![standup(300)],
    });
    let h = harness_with(Database::open_in_memory().unwrap(), Some(calendar)).await;
    let mut events = h.handle.subscribe();
    h.handle.refresh_calendar(at(0)).await.unwrap();
    next_matching(&mut events, |e| {
        matches!(e, EngineEvent::AutoStartCandidate(_))
    })
    .await;

    h.handle
        .start_focus(StartFocusRequest::manual(None, None), at(10))
        .await
        .unwrap();
    let err = h
        .handle
        .confirm_candidate("evt-1", at(20))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    // Candidate is still open and can be dismissed
    h.handle.dismiss_candidate("evt-1").await.unwrap();
}

#[tokio::test]
async fn test_candidate_operations_disabled_without_calendar() {
    let h = harness().await;
    let snapshot = h.handle.status().await.unwrap();
    assert!(!snapshot.calendar_enabled);

    let err = h
        .handle
        .confirm_candidate("evt-1", at(0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Disabled(_)));
    let err = h.handle.dismiss_candidate("evt-1").await.unwrap_err();
    assert!(matches!(err, EngineError::Disabled(_)));
}

#[tokio::test]
async fn test_dismiss_warning() {
    let h = harness().await;
    h.handle
        .push_sample(ActivitySample::new(at(0), "Code", true))
        .await
        .unwrap();
    assert!(!h.handle.dismiss_warning(at(1)).await.unwrap());

    h.handle.tick(at(600)).await.unwrap();
    assert!(h.handle.dismiss_warning(at(601)).await.unwrap());

    let snapshot = h.handle.status().await.unwrap();
    assert_eq!(snapshot.presence.state, PresenceStatus::Warning);
    assert!(snapshot.presence.warning_dismissed);
}

#[tokio::test]
async fn test_restores_open_session_paused() {
    let db = Database::open_in_memory().unwrap();
    let mut left_open = WorkSession::new(at(0), Some("Acme".to_string()), None, None);
    left_open.updated_at = at(100);
    db.upsert_work_session(&left_open).unwrap();

    let h = harness_with(db, None).await;
    let snapshot = h.handle.status().await.unwrap();
    let session = snapshot.session.unwrap();
    assert_eq!(session.id, left_open.id);
    assert_eq!(session.status, SessionStatus::Paused);
    assert_eq!(session.open_pause().unwrap().start, at(100));

    let err = h
        .handle
        .start_session(StartSessionRequest::default(), at(200))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn test_screenshots_counted_and_stored() {
    let h = harness().await;
    let session = h
        .handle
        .start_session(StartSessionRequest::default(), at(0))
        .await
        .unwrap();
    h.handle.record_screenshot(at(10)).await.unwrap();
    assert_eq!(h.handle.record_screenshot(at(20)).await.unwrap(), 2);

    settled(&h.handle).await;
    let stored = h.db.get_work_session(session.id).unwrap().unwrap();
    assert_eq!(stored.screenshot_count, 2);
}

#[tokio::test]
async fn test_handle_unavailable_after_shutdown() {
    let h = harness().await;
    let session = h
        .handle
        .start_session(StartSessionRequest::default(), at(0))
        .await
        .unwrap();
    h.handle.shutdown().await.unwrap();

    let err = h.handle.status().await.unwrap_err();
    assert_eq!(err, EngineError::Unavailable);
    // The open session survives for the next run
    let stored = h.db.get_open_work_session().unwrap().unwrap();
    assert_eq!(stored.id, session.id);
}

#[tokio::test]
async fn test_paused_focus_does_not_block() {
    let h = harness().await;
    let mut events = h.handle.subscribe();
    h.handle
        .start_focus(StartFocusRequest::manual(None, None), at(0))
        .await
        .unwrap();
    let paused = h.handle.pause_focus(at(1)).await.unwrap();
    assert_eq!(paused.status, FocusStatus::Paused);

    h.handle
        .push_sample(ActivitySample::new(at(2), "Discord", true))
        .await
        .unwrap();
    h.handle.tick(at(2)).await.unwrap();
    assert!(h.handle.status().await.unwrap().active_block.is_none());

    h.handle.resume_focus(at(3)).await.unwrap();
    h.handle.tick(at(3)).await.unwrap();
    let blocked = next_matching(&mut events, |e| {
        matches!(e, EngineEvent::DistractionBlocked(_))
    })
    .await;
    let EngineEvent::DistractionBlocked(decision) = blocked else {
        unreachable!()
    };
    assert_eq!(decision.item, "Discord");
}
