//! Session control plane: start, cancel, pause, resume and observe runs.

use crate::backend::BackendFactory;
use crate::config::AutoApplyConfig;
use crate::llm::Evaluator;
use crate::orchestrator::SessionRunner;
use crate::poll::{PollOutcome, poll_until};
use crate::progress::{ProgressCache, ProgressEmitter};
use crate::site::SiteProfile;
use crate::store::{SessionStore, StoreError};
use autoapply_common::model::{Session, SessionConfig, SessionId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How many sessions a per-user listing returns.
pub const SESSION_LIST_LIMIT: usize = 10;

/// Cooperative cancel/pause switches shared between the control plane and a run.
#[derive(Debug, Default)]
pub struct ControlFlags {
    cancel: AtomicBool,
    pause: AtomicBool,
}

impl ControlFlags {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Block while paused, re-checking every `interval`. Returns `false` if
    /// cancelled meanwhile.
    pub async fn wait_while_paused(&self, interval: Duration) -> bool {
        let outcome = poll_until(
            || async move { !self.is_paused() },
            interval,
            Duration::MAX,
            self,
        )
        .await;
        outcome == PollOutcome::Satisfied
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Invalid session config: {0}")]
    InvalidConfig(String),

    #[error("User {user_id} already has an active session ({session_id})")]
    AlreadyActive {
        user_id: String,
        session_id: SessionId,
    },

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Session {0} is still active; cancel it first")]
    StillActive(SessionId),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Invalid site URL: {0}")]
    Site(#[from] url::ParseError),
}

struct ControlEntry {
    user_id: String,
    flags: Arc<ControlFlags>,
}

struct ManagerInner {
    config: Arc<AutoApplyConfig>,
    site: Arc<SiteProfile>,
    factory: Arc<dyn BackendFactory>,
    evaluator: Arc<dyn Evaluator>,
    store: Arc<dyn SessionStore>,
    cache: Arc<ProgressCache>,
    controls: Mutex<HashMap<SessionId, ControlEntry>>,
    runs: Mutex<HashMap<SessionId, JoinHandle<()>>>,
}

impl ManagerInner {
    fn with_entry<T>(&self, id: &str, f: impl FnOnce(&ControlEntry) -> T) -> Option<T> {
        let controls = self.controls.lock().unwrap_or_else(PoisonError::into_inner);
        controls.get(id).map(f)
    }
}

/// Owns every live session of this process. Cloning shares the same state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(
        config: AutoApplyConfig,
        factory: Arc<dyn BackendFactory>,
        evaluator: Arc<dyn Evaluator>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ControlError> {
        let site = SiteProfile::indeed(&config.site)?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config: Arc::new(config),
                site: Arc::new(site),
                factory,
                evaluator,
                store,
                cache: Arc::new(ProgressCache::new()),
                controls: Mutex::new(HashMap::new()),
                runs: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Validate, register and spawn a run. One live session per user.
    pub fn start(&self, config: SessionConfig) -> Result<SessionId, ControlError> {
        validate(&config)?;

        let id = uuid::Uuid::new_v4().to_string();
        let flags = Arc::new(ControlFlags::default());

        let mut controls = self
            .inner
            .controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((session_id, _)) = controls.iter().find(|(_, e)| e.user_id == config.user_id)
        {
            return Err(ControlError::AlreadyActive {
                user_id: config.user_id.clone(),
                session_id: session_id.clone(),
            });
        }

        let session = Session::new(id.clone(), &config);
        let (emitter, writer) = ProgressEmitter::start(
            session,
            self.inner.cache.clone(),
            self.inner.store.clone(),
        );
        controls.insert(
            id.clone(),
            ControlEntry {
                user_id: config.user_id.clone(),
                flags: flags.clone(),
            },
        );
        drop(controls);

        let runner = SessionRunner {
            site: self.inner.site.clone(),
            config: self.inner.config.clone(),
            evaluator: self.inner.evaluator.clone(),
            flags,
            emitter,
            session: config,
        };
        let inner = self.inner.clone();
        let run_id = id.clone();
        info!("Starting session {} for user {}", id, runner.session.user_id);

        let handle = tokio::spawn(async move {
            let mut backend = inner.factory.create();
            let outcome = runner.run(backend.as_mut()).await;

            // Unregister before publishing the final status so a late pause or
            // resume cannot overwrite it.
            inner
                .controls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&run_id);
            runner.emitter.status(outcome.status, outcome.error);
            info!("Session {} finished: {}", run_id, outcome.status);
            drop(runner);
            writer.drain(DRAIN_TIMEOUT).await;
        });
        self.inner
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), handle);
        Ok(id)
    }

    pub fn cancel(&self, id: &str) -> bool {
        self.inner
            .with_entry(id, |entry| {
                info!("Cancelling session {}", id);
                entry.flags.cancel();
            })
            .is_some()
    }

    /// Takes effect before the next job. The run publishes `paused` once it
    /// actually stops.
    pub fn pause(&self, id: &str) -> bool {
        self.inner
            .with_entry(id, |entry| {
                info!("Pausing session {}", id);
                entry.flags.pause();
            })
            .is_some()
    }

    pub fn resume(&self, id: &str) -> bool {
        self.inner
            .with_entry(id, |entry| {
                info!("Resuming session {}", id);
                entry.flags.resume();
            })
            .is_some()
    }

    /// Latest in-memory snapshot; never touches the durable store.
    pub fn progress(&self, id: &str) -> Option<Session> {
        self.inner.cache.get(id)
    }

    /// In-memory snapshot, falling back to the durable record.
    pub async fn lookup(&self, id: &str) -> Option<Session> {
        if let Some(session) = self.progress(id) {
            return Some(session);
        }
        match self.inner.store.load_session(id).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to load session {} from store: {}", id, e);
                None
            }
        }
    }

    /// A user's recent sessions, newest first. Snapshots from this process
    /// win over durable records of the same session. A store outage yields
    /// the in-memory sessions only.
    pub async fn sessions_for(&self, user_id: &str) -> Vec<Session> {
        let stored = match self
            .inner
            .store
            .list_sessions(user_id, SESSION_LIST_LIMIT)
            .await
        {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Failed to list sessions for {} from store: {}", user_id, e);
                Vec::new()
            }
        };

        let mut merged: HashMap<SessionId, Session> = stored
            .into_iter()
            .map(|session| (session.id.clone(), session))
            .collect();
        for session in self.inner.cache.for_user(user_id) {
            merged.insert(session.id.clone(), session);
        }
        let mut sessions: Vec<Session> = merged.into_values().collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions.truncate(SESSION_LIST_LIMIT);
        sessions
    }

    /// Remove a finished session of `user_id` from memory and from the store.
    /// Live sessions must be cancelled first.
    pub async fn delete(&self, user_id: &str, id: &str) -> Result<(), ControlError> {
        if self.is_active(id) {
            return Err(ControlError::StillActive(id.to_string()));
        }
        let owned = match self.progress(id) {
            Some(session) => session.user_id == user_id,
            None => self
                .inner
                .store
                .load_session(id)
                .await?
                .is_some_and(|session| session.user_id == user_id),
        };
        if !owned {
            return Err(ControlError::UnknownSession(id.to_string()));
        }

        // Let the finished run drain its queued writes so none land after
        // the delete.
        let handle = self
            .inner
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(handle) = handle {
            handle.await?;
        }
        self.inner.store.delete_session(id).await?;
        self.inner.cache.remove(id);
        info!("Deleted session {}", id);
        Ok(())
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.inner.with_entry(id, |_| ()).is_some()
    }

    /// Await the run and return its final snapshot.
    pub async fn wait(&self, id: &str) -> Result<Session, ControlError> {
        let handle = self
            .inner
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(handle) = handle {
            handle.await?;
        }
        self.progress(id)
            .ok_or_else(|| ControlError::UnknownSession(id.to_string()))
    }
}

fn validate(config: &SessionConfig) -> Result<(), ControlError> {
    if config.user_id.trim().is_empty() {
        return Err(ControlError::InvalidConfig("user id is empty".into()));
    }
    if config.search.query.trim().is_empty() {
        return Err(ControlError::InvalidConfig("search query is empty".into()));
    }
    if config.max_applications == 0 {
        return Err(ControlError::InvalidConfig(
            "max applications must be at least 1".into(),
        ));
    }
    if config.min_match_score > 100 {
        return Err(ControlError::InvalidConfig(format!(
            "min match score {} is above 100",
            config.min_match_score
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pause_wait_ends_on_resume() {
        let flags = Arc::new(ControlFlags::default());
        flags.pause();
        let waiter = {
            let flags = flags.clone();
            tokio::spawn(async move { flags.wait_while_paused(Duration::from_millis(2500)).await })
        };
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!waiter.is_finished());
        flags.resume();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unpaused_wait_returns_at_once() {
        let flags = ControlFlags::default();
        let started = tokio::time::Instant::now();
        assert!(flags.wait_while_paused(Duration::from_millis(2500)).await);
        assert_eq!(started.elapsed(), Duration::ZERO);

        flags.cancel();
        assert!(!flags.wait_while_paused(Duration::from_millis(2500)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_breaks_the_pause_wait() {
        let flags = Arc::new(ControlFlags::default());
        flags.pause();
        let waiter = {
            let flags = flags.clone();
            tokio::spawn(async move { flags.wait_while_paused(Duration::from_millis(2500)).await })
        };
        tokio::time::sleep(Duration::from_secs(3)).await;
        flags.cancel();
        assert!(!waiter.await.unwrap());
    }
}
