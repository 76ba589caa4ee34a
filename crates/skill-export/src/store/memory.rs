//! In-process store implementing all three collection traits
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};

use super::{
    ExperienceStateDocument, ExperienceStateStore, SessionStateDocument, SessionStateStore,
    UserPreferencesDocument, UserPreferencesStore,
};
use crate::model::SessionId;

#[derive(Clone, Default)]
pub struct InMemoryStore {
    states: Arc<DashMap<SessionId, Map<String, Value>>>,
    users: Arc<RwLock<Vec<UserPreferencesDocument>>>,
    sessions: Arc<RwLock<Vec<SessionStateDocument>>>,
    state_lookups: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any state already stored for `session_id`.
    pub fn put_state(&self, session_id: SessionId, state: Map<String, Value>) {
        self.states.insert(session_id, state);
    }

    pub fn add_user(
        &self,
        user_id: Option<&str>,
        created_at: Option<DateTime<Utc>>,
        sessions: Vec<SessionId>,
    ) -> anyhow::Result<()> {
        self.users
            .write()
            .map_err(|_| anyhow::anyhow!("user preferences lock poisoned"))?
            .push(UserPreferencesDocument {
                user_id: user_id.map(str::to_string),
                created_at,
                sessions,
            });
        Ok(())
    }

    pub fn add_session(
        &self,
        session_id: Option<SessionId>,
        conducted_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        self.sessions
            .write()
            .map_err(|_| anyhow::anyhow!("session state lock poisoned"))?
            .push(SessionStateDocument {
                session_id,
                conversation_conducted_at: conducted_at,
            });
        Ok(())
    }

    /// Number of `find_by_session_ids` calls served so far.
    pub fn state_lookups(&self) -> usize {
        self.state_lookups.load(Ordering::SeqCst)
    }

    /// While set, every read fails as if the backing store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ExperienceStateStore for InMemoryStore {
    async fn find_by_session_ids(
        &self,
        session_ids: &[SessionId],
    ) -> anyhow::Result<Vec<ExperienceStateDocument>> {
        self.check_available()?;
        self.state_lookups.fetch_add(1, Ordering::SeqCst);

        let mut documents: Vec<_> = session_ids
            .iter()
            .filter_map(|id| {
                self.states.get(id).map(|state| ExperienceStateDocument {
                    session_id: *id,
                    experiences_state: state.value().clone(),
                })
            })
            .collect();
        documents.sort_by_key(|d| d.session_id);
        documents.dedup_by_key(|d| d.session_id);
        Ok(documents)
    }

    async fn list_session_ids(&self) -> anyhow::Result<Vec<SessionId>> {
        self.check_available()?;
        let mut ids: Vec<_> = self.states.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait]
impl UserPreferencesStore for InMemoryStore {
    async fn find_all(&self) -> anyhow::Result<Vec<UserPreferencesDocument>> {
        self.check_available()?;
        let users = self
            .users
            .read()
            .map_err(|_| anyhow::anyhow!("user preferences lock poisoned"))?;
        Ok(users.clone())
    }
}

#[async_trait]
impl SessionStateStore for InMemoryStore {
    async fn find_all(&self) -> anyhow::Result<Vec<SessionStateDocument>> {
        self.check_available()?;
        let sessions = self
            .sessions
            .read()
            .map_err(|_| anyhow::anyhow!("session state lock poisoned"))?;
        Ok(sessions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_find_by_session_ids_counts_lookups() {
        let store = InMemoryStore::new();
        let Value::Object(state) = json!({"a": {}}) else { unreachable!() };
        store.put_state(2, state.clone());
        store.put_state(1, state);

        let docs = store.find_by_session_ids(&[2, 1, 2, 7]).await.unwrap();
        assert_eq!(docs.iter().map(|d| d.session_id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(store.state_lookups(), 1);
        assert_eq!(store.list_session_ids().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_reads() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(store.find_by_session_ids(&[1]).await.is_err());
        assert!(UserPreferencesStore::find_all(&store).await.is_err());
        assert!(SessionStateStore::find_all(&store).await.is_err());

        store.set_unavailable(false);
        assert!(store.find_by_session_ids(&[1]).await.unwrap().is_empty());
    }
}
