//! Durable session writes.
//!
//! The engine never waits on storage. Writes go to a background writer that
//! retries failures with exponential backoff and reports completion back
//! through the engine's command queue.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vigil_storage::{Database, WorkSession};

use crate::config::PersistenceConfig;
use crate::engine::Command;
use crate::error::EngineError;

/// Durable home of work sessions. Writes are idempotent by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &WorkSession) -> Result<()>;
    async fn update_session(&self, session: &WorkSession) -> Result<()>;
    async fn close_session(&self, session: &WorkSession) -> Result<()>;
    /// The session left open by a previous run, if any
    async fn open_session(&self) -> Result<Option<WorkSession>>;
}

#[async_trait]
impl SessionStore for Database {
    async fn create_session(&self, session: &WorkSession) -> Result<()> {
        self.upsert_work_session(session)
    }

    async fn update_session(&self, session: &WorkSession) -> Result<()> {
        self.upsert_work_session(session)
    }

    async fn close_session(&self, session: &WorkSession) -> Result<()> {
        self.upsert_work_session(session)
    }

    async fn open_session(&self) -> Result<Option<WorkSession>> {
        self.get_open_work_session()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOp {
    Create,
    Update,
    Close,
}

#[derive(Debug, Clone)]
pub struct PersistRequest {
    pub op: PersistOp,
    pub session: WorkSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    #[must_use]
    pub const fn from_config(config: &PersistenceConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_secs(config.max_backoff_secs),
        }
    }

    #[must_use]
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<PersistRequest>,
    closing: CancellationToken,
    handle: JoinHandle<()>,
}

impl PersistenceWriter {
    /// Spawn the writer task. Each settled write is reported to `notify`.
    #[must_use]
    pub fn spawn(
        store: Arc<dyn SessionStore>,
        backoff: Backoff,
        token: CancellationToken,
        notify: mpsc::Sender<Command>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let closing = CancellationToken::new();
        let acks = Acks {
            notify,
            closing: closing.clone(),
        };
        let handle = tokio::spawn(run_writer(store, backoff, token, rx, acks));
        Self {
            tx,
            closing,
            handle,
        }
    }

    /// Queue a write. Returns false if the writer has stopped.
    pub fn submit(&self, op: PersistOp, session: WorkSession) -> bool {
        self.tx.send(PersistRequest { op, session }).is_ok()
    }

    /// Stop accepting writes and wait up to `grace` for the queue to drain
    pub async fn close(self, grace: Duration) {
        let Self {
            tx,
            closing,
            handle,
        } = self;
        drop(tx);
        // The engine is no longer reading its queue
        closing.cancel();
        if tokio::time::timeout(grace, handle).await.is_err() {
            log::warn!("Persistence writer did not drain within {grace:?}");
        }
    }
}

/// Reports settled writes back into the engine queue
struct Acks {
    notify: mpsc::Sender<Command>,
    closing: CancellationToken,
}

impl Acks {
    /// Waits for queue space so no ack is lost, unless the writer is closing
    async fn settled(&self, session_id: Uuid) {
        tokio::select! {
            () = self.closing.cancelled() => {}
            _ = self.notify.send(Command::PersistenceSettled { session_id }) => {}
        }
    }
}

async fn run_writer(
    store: Arc<dyn SessionStore>,
    backoff: Backoff,
    token: CancellationToken,
    mut rx: mpsc::UnboundedReceiver<PersistRequest>,
    acks: Acks,
) {
    while let Some(request) = rx.recv().await {
        let mut delay = backoff.initial;
        loop {
            match apply(store.as_ref(), &request).await {
                Ok(()) => break,
                Err(e) => {
                    let deferred = EngineError::PersistenceDeferred(format!(
                        "{:?} of session {} failed: {e:#}",
                        request.op, request.session.id
                    ));
                    log::warn!("{deferred}; retrying in {delay:?}");
                    tokio::select! {
                        () = token.cancelled() => {
                            log::warn!("Persistence writer cancelled with a write outstanding");
                            return;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                    delay = backoff.next(delay);
                }
            }
        }

        acks.settled(request.session.id).await;
    }
    log::debug!("Persistence writer drained");
}

async fn apply(store: &dyn SessionStore, request: &PersistRequest) -> Result<()> {
    match request.op {
        PersistOp::Create => store.create_session(&request.session).await,
        PersistOp::Update => store.update_session(&request.session).await,
        PersistOp::Close => store.close_session(&request.session).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` writes, then stores in memory
    struct FlakyStore {
        failures: AtomicUsize,
        attempts: AtomicUsize,
        stored: Mutex<Vec<WorkSession>>,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                attempts: AtomicUsize::new(0),
                stored: Mutex::new(Vec::new()),
            }
        }

        fn write(&self, session: &WorkSession) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("disk unavailable");
            }
            self.stored.lock().unwrap().push(session.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn create_session(&self, session: &WorkSession) -> Result<()> {
            self.write(session)
        }
        async fn update_session(&self, session: &WorkSession) -> Result<()> {
            self.write(session)
        }
        async fn close_session(&self, session: &WorkSession) -> Result<()> {
            self.write(session)
        }
        async fn open_session(&self) -> Result<Option<WorkSession>> {
            Ok(None)
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::from_config(&PersistenceConfig::default());
        assert_eq!(backoff.initial, Duration::from_millis(500));
        assert_eq!(backoff.next(Duration::from_millis(500)), Duration::from_secs(1));
        assert_eq!(backoff.next(Duration::from_secs(40)), Duration::from_secs(60));
        assert_eq!(backoff.next(Duration::from_secs(60)), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_writer_retries_until_success() {
        let store = Arc::new(FlakyStore::new(2));
        let (notify_tx, mut notify_rx) = mpsc::channel(8);
        let backoff = Backoff {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
        };
        let writer = PersistenceWriter::spawn(
            store.clone(),
            backoff,
            CancellationToken::new(),
            notify_tx,
        );

        let session = WorkSession::new(Utc::now(), None, None, None);
        assert!(writer.submit(PersistOp::Create, session.clone()));

        let settled = tokio::time::timeout(Duration::from_secs(5), notify_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            settled,
            Command::PersistenceSettled { session_id } if session_id == session.id
        ));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.stored.lock().unwrap().len(), 1);

        writer.close(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_acks_wait_for_queue_space() {
        let store = Arc::new(FlakyStore::new(0));
        let (notify_tx, mut notify_rx) = mpsc::channel(1);
        let writer = PersistenceWriter::spawn(
            store.clone(),
            Backoff::from_config(&PersistenceConfig::default()),
            CancellationToken::new(),
            notify_tx,
        );

        let sessions: Vec<_> = (0..3)
            .map(|_| WorkSession::new(Utc::now(), None, None, None))
            .collect();
        for session in &sessions {
            assert!(writer.submit(PersistOp::Update, session.clone()));
        }
        // Let the writer fill the queue before anyone reads it
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut settled = Vec::new();
        for _ in 0..3 {
            let ack = tokio::time::timeout(Duration::from_secs(5), notify_rx.recv())
                .await
                .unwrap()
                .unwrap();
            let Command::PersistenceSettled { session_id } = ack else {
                panic!("unexpected command");
            };
            settled.push(session_id);
        }
        let expected: Vec<_> = sessions.iter().map(|s| s.id).collect();
        assert_eq!(settled, expected);

        writer.close(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_close_does_not_wait_on_full_queue() {
        let store = Arc::new(FlakyStore::new(0));
        let (notify_tx, _notify_rx) = mpsc::channel(1);
        let writer = PersistenceWriter::spawn(
            store.clone(),
            Backoff::from_config(&PersistenceConfig::default()),
            CancellationToken::new(),
            notify_tx,
        );
        for _ in 0..3 {
            writer.submit(PersistOp::Update, WorkSession::new(Utc::now(), None, None, None));
        }

        let started = std::time::Instant::now();
        writer.close(Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(store.stored.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_database_store_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let session = WorkSession::new(Utc::now(), Some("Acme".to_string()), None, None);
        db.create_session(&session).await.unwrap();

        let open = db.open_session().await.unwrap().unwrap();
        assert_eq!(open.id, session.id);
    }
}
