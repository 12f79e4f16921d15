use super::{SessionStore, StoreError, newest_first};
use async_trait::async_trait;
use autoapply_common::model::{ApplyLogEntry, Counters, Session, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One line of the append-only file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Record {
    Session {
        session: Session,
    },
    Log {
        session_id: String,
        entry: ApplyLogEntry,
    },
    Counters {
        session_id: String,
        counters: Counters,
    },
    Status {
        session_id: String,
        status: SessionStatus,
        #[serde(default)]
        error: Option<String>,
        at: DateTime<Utc>,
    },
    Deleted {
        session_id: String,
    },
}

impl Record {
    fn session_id(&self) -> &str {
        match self {
            Record::Session { session } => session.id.as_str(),
            Record::Log { session_id, .. }
            | Record::Counters { session_id, .. }
            | Record::Status { session_id, .. }
            | Record::Deleted { session_id } => session_id.as_str(),
        }
    }
}

/// Append-only JSON-lines store. Every write is one line; reads replay the file.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: &Record) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Replay the file, keeping only records `keep` accepts. A missing file
    /// is an empty store.
    async fn replay(
        &self,
        keep: impl Fn(&Record) -> bool,
    ) -> Result<HashMap<String, Session>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions: HashMap<String, Session> = HashMap::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            // A torn trailing line from a crash is skipped, not fatal.
            let Ok(record) = serde_json::from_str::<Record>(line) else {
                continue;
            };
            if !keep(&record) {
                continue;
            }
            match record {
                Record::Session { session } => {
                    sessions.insert(session.id.clone(), session);
                }
                Record::Log { session_id, entry } => {
                    if let Some(s) = sessions.get_mut(&session_id) {
                        s.logs.push(entry);
                    }
                }
                Record::Counters {
                    session_id,
                    counters,
                } => {
                    if let Some(s) = sessions.get_mut(&session_id) {
                        s.counters = counters;
                    }
                }
                Record::Status {
                    session_id,
                    status,
                    error,
                    at,
                } => {
                    if let Some(s) = sessions.get_mut(&session_id) {
                        s.status = status;
                        if error.is_some() {
                            s.last_error = error;
                        }
                        if status.is_terminal() {
                            s.completed_at = Some(at);
                        }
                    }
                }
                Record::Deleted { session_id } => {
                    sessions.remove(&session_id);
                }
            }
        }
        Ok(sessions)
    }
}

#[async_trait]
impl SessionStore for JsonlStore {
    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        self.append(&Record::Session {
            session: session.clone(),
        })
        .await
    }

    async fn create_log(&self, session_id: &str, entry: &ApplyLogEntry) -> Result<(), StoreError> {
        self.append(&Record::Log {
            session_id: session_id.to_string(),
            entry: entry.clone(),
        })
        .await
    }

    async fn update_counters(
        &self,
        session_id: &str,
        counters: &Counters,
    ) -> Result<(), StoreError> {
        self.append(&Record::Counters {
            session_id: session_id.to_string(),
            counters: *counters,
        })
        .await
    }

    async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.append(&Record::Status {
            session_id: session_id.to_string(),
            status,
            error: error.map(str::to_string),
            at: Utc::now(),
        })
        .await
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let mut sessions = self.replay(|r| r.session_id() == session_id).await?;
        Ok(sessions.remove(session_id))
    }

    async fn list_sessions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Session>, StoreError> {
        let sessions = self
            .replay(|_| true)
            .await?
            .into_values()
            .filter(|s| s.user_id == user_id)
            .collect();
        Ok(newest_first(sessions, limit))
    }

    /// Appends a tombstone; replay drops everything recorded before it.
    async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError> {
        if self.load_session(session_id).await?.is_none() {
            return Ok(false);
        }
        self.append(&Record::Deleted {
            session_id: session_id.to_string(),
        })
        .await?;
        Ok(true)
    }
}
