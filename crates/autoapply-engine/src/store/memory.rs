use super::{SessionStore, StoreError, newest_first};
use async_trait::async_trait;
use autoapply_common::model::{ApplyLogEntry, Counters, Session, SessionStatus};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn with_session<F>(&self, session_id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))?;
        f(session);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn create_log(&self, session_id: &str, entry: &ApplyLogEntry) -> Result<(), StoreError> {
        self.with_session(session_id, |s| s.logs.push(entry.clone()))
            .await
    }

    async fn update_counters(
        &self,
        session_id: &str,
        counters: &Counters,
    ) -> Result<(), StoreError> {
        self.with_session(session_id, |s| s.counters = *counters)
            .await
    }

    async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_session(session_id, |s| {
            s.status = status;
            if let Some(error) = error {
                s.last_error = Some(error.to_string());
            }
            if status.is_terminal() {
                s.completed_at = Some(Utc::now());
            }
        })
        .await
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn list_sessions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Session>, StoreError> {
        let sessions = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(sessions, limit))
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoapply_common::model::{ApplicantProfile, SearchParams, SessionConfig};

    fn session(id: &str) -> Session {
        let config = SessionConfig {
            user_id: "u1".into(),
            search: SearchParams {
                query: "rust".into(),
                location: "Remote".into(),
                job_type: None,
            },
            max_applications: 3,
            min_match_score: 60,
            profile: ApplicantProfile::default(),
            resume_path: None,
        };
        Session::new(id.into(), &config)
    }

    #[tokio::test]
    async fn terminal_status_stamps_completion() {
        let store = MemoryStore::new();
        store.create_session(&session("s1")).await.unwrap();
        store
            .update_status("s1", SessionStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let loaded = store.load_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Failed);
        assert_eq!(loaded.last_error.as_deref(), Some("boom"));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn lists_newest_first_and_deletes() {
        let store = MemoryStore::new();
        let older = session("old");
        let mut newer = session("new");
        newer.started_at = older.started_at + chrono::Duration::minutes(5);
        let mut foreign = session("foreign");
        foreign.user_id = "u2".into();
        for s in [&older, &newer, &foreign] {
            store.create_session(s).await.unwrap();
        }

        let ids: Vec<_> = store
            .list_sessions("u1", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(store.list_sessions("u1", 1).await.unwrap()[0].id, "new");

        assert!(store.delete_session("new").await.unwrap());
        assert!(!store.delete_session("new").await.unwrap());
        assert!(store.load_session("new").await.unwrap().is_none());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn writes_to_unknown_sessions_fail() {
        let store = MemoryStore::new();
        let err = store
            .update_counters("missing", &Counters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownSession(_)));
        assert!(store.is_empty().await);
    }
}
