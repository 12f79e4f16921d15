//! In-memory session snapshots plus a queued writer for the durable store.
//!
//! Snapshot updates are synchronous and unconditional. Store writes go
//! through an unbounded channel to a background task, so a slow or broken
//! store never blocks the run.

use crate::store::SessionStore;
use autoapply_common::model::{
    ApplyLogEntry, Counters, JobListing, Session, SessionId, SessionStatus,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Latest snapshot of every session this process has run.
#[derive(Debug, Default)]
pub struct ProgressCache {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl ProgressCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), session);
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Newest first.
    pub fn for_user(&self, user_id: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Apply `f` to the snapshot and return the updated copy.
    pub fn update<F>(&self, id: &str, f: F) -> Option<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.get_mut(id)?;
        f(session);
        Some(session.clone())
    }
}

#[derive(Debug)]
enum StoreOp {
    CreateSession(Box<Session>),
    CreateLog(Box<ApplyLogEntry>),
    Counters(Counters),
    Status(SessionStatus, Option<String>),
}

impl StoreOp {
    fn name(&self) -> &'static str {
        match self {
            StoreOp::CreateSession(_) => "create_session",
            StoreOp::CreateLog(_) => "create_log",
            StoreOp::Counters(_) => "update_counters",
            StoreOp::Status(..) => "update_status",
        }
    }
}

/// Reporting handle for one session. Cheap to clone; the writer stops once
/// every clone is dropped.
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    id: SessionId,
    cache: Arc<ProgressCache>,
    tx: mpsc::UnboundedSender<StoreOp>,
}

/// Background task performing the queued store writes.
#[derive(Debug)]
pub struct ProgressWriter {
    id: SessionId,
    handle: JoinHandle<()>,
}

impl ProgressWriter {
    /// Wait for queued writes, up to `timeout`. Requires every emitter clone
    /// to have been dropped first.
    pub async fn drain(self, timeout: Duration) {
        let abort = self.handle.abort_handle();
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => debug!("Store writer for session {} drained", self.id),
            Ok(Err(e)) => warn!("Store writer for session {} panicked: {}", self.id, e),
            Err(_) => {
                warn!(
                    "Store writer for session {} did not drain within {:?}, dropping pending writes",
                    self.id, timeout
                );
                abort.abort();
            }
        }
    }
}

impl ProgressEmitter {
    /// Publish the initial snapshot and queue the durable session record.
    pub fn start(
        session: Session,
        cache: Arc<ProgressCache>,
        store: Arc<dyn SessionStore>,
    ) -> (Self, ProgressWriter) {
        let id = session.id.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(id.clone(), rx, store));

        cache.insert(session.clone());
        let emitter = Self {
            id: id.clone(),
            cache,
            tx,
        };
        emitter.queue(StoreOp::CreateSession(Box::new(session)));
        (emitter, ProgressWriter { id, handle })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> Option<Session> {
        self.cache.get(&self.id)
    }

    pub fn step(&self, label: impl Into<String>) {
        let label = label.into();
        debug!("[{}] {}", self.id, label);
        self.cache.update(&self.id, |s| s.current_step = Some(label));
    }

    pub fn current_job(&self, job: Option<&JobListing>) {
        let label = job.map(JobListing::label);
        self.cache.update(&self.id, |s| s.current_job = label);
    }

    pub fn found(&self, total: u32) {
        if let Some(session) = self
            .cache
            .update(&self.id, |s| s.counters.total_found = total)
        {
            self.queue(StoreOp::Counters(session.counters));
        }
    }

    /// Append an outcome, bump the matching counter and queue both writes.
    pub fn log(&self, entry: ApplyLogEntry) {
        let updated = self.cache.update(&self.id, |s| {
            s.counters.record(entry.status);
            s.logs.push(entry.clone());
        });
        info!(
            "[{}] {:?}: {} at {}",
            self.id, entry.status, entry.job_title, entry.company
        );
        if let Some(session) = updated {
            self.queue(StoreOp::CreateLog(Box::new(entry)));
            self.queue(StoreOp::Counters(session.counters));
        }
    }

    pub fn status(&self, status: SessionStatus, error: Option<String>) {
        let updated = self.cache.update(&self.id, |s| {
            s.status = status;
            if error.is_some() {
                s.last_error = error.clone();
            }
            if status.is_terminal() {
                s.completed_at = Some(Utc::now());
                s.current_job = None;
                s.current_step = None;
            }
        });
        if updated.is_some() {
            self.queue(StoreOp::Status(status, error));
        }
    }

    fn queue(&self, op: StoreOp) {
        if let Err(e) = self.tx.send(op) {
            warn!(
                "Store writer for session {} is gone, dropping {}",
                self.id,
                e.0.name()
            );
        }
    }
}

async fn run_writer(
    id: SessionId,
    mut rx: mpsc::UnboundedReceiver<StoreOp>,
    store: Arc<dyn SessionStore>,
) {
    while let Some(op) = rx.recv().await {
        let name = op.name();
        let result = match &op {
            StoreOp::CreateSession(session) => store.create_session(session).await,
            StoreOp::CreateLog(entry) => store.create_log(&id, entry).await,
            StoreOp::Counters(counters) => store.update_counters(&id, counters).await,
            StoreOp::Status(status, error) => {
                store.update_status(&id, *status, error.as_deref()).await
            }
        };
        if let Err(e) = result {
            warn!("Store {} failed for session {}: {}", name, id, e);
        }
    }
}
