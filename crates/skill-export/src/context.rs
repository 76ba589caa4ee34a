//! Session context: who owns a session and when it was conducted.
//!
//! Both lookup tables are built once per run from unfiltered scans of their
//! collections and then joined onto the resolved experiences by session id.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};

use crate::error::{ExportError, Result};
use crate::model::{AggregatedRecord, SessionId, UserContext};
use crate::resolver::ResolvedSessions;
use crate::store::{
    SessionStateDocument, SessionStateStore, UserPreferencesDocument, UserPreferencesStore,
};

/// Sortable RFC 3339 UTC text, e.g. `2024-05-01T10:00:00Z`.
pub fn normalize_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[derive(Debug, Default, Clone)]
pub struct SessionContext {
    users: HashMap<SessionId, UserContext>,
    timestamps: HashMap<SessionId, String>,
}

impl SessionContext {
    /// One full scan of each collection.
    pub async fn load(
        users: &dyn UserPreferencesStore,
        sessions: &dyn SessionStateStore,
    ) -> Result<Self> {
        let user_documents = users.find_all().await.map_err(ExportError::storage)?;
        let session_documents = sessions.find_all().await.map_err(ExportError::storage)?;
        let context = Self::from_documents(user_documents, session_documents);
        info!(
            "Session context loaded: {} sessions with a user, {} with a timestamp",
            context.users.len(),
            context.timestamps.len()
        );
        Ok(context)
    }

    pub fn from_documents<U, S>(users: U, sessions: S) -> Self
    where
        U: IntoIterator<Item = UserPreferencesDocument>,
        S: IntoIterator<Item = SessionStateDocument>,
    {
        let mut context = Self::default();

        for document in users {
            let user = UserContext {
                user_id: document.user_id,
                user_created_at: document.created_at.as_ref().map(normalize_timestamp),
            };
            for session_id in document.sessions {
                if let Some(previous) = context.users.insert(session_id, user.clone()) {
                    if previous.user_id != user.user_id {
                        debug!(
                            "session_id {} listed under users {:?} and {:?}; keeping the latter",
                            session_id, previous.user_id, user.user_id
                        );
                    }
                }
            }
        }

        for document in sessions {
            if let (Some(session_id), Some(conducted_at)) =
                (document.session_id, document.conversation_conducted_at)
            {
                context
                    .timestamps
                    .insert(session_id, normalize_timestamp(&conducted_at));
            }
        }

        context
    }

    pub fn user(&self, session_id: SessionId) -> Option<&UserContext> {
        self.users.get(&session_id)
    }

    pub fn timestamp(&self, session_id: SessionId) -> Option<&str> {
        self.timestamps.get(&session_id).map(String::as_str)
    }

    /// One record per resolved session, in ascending session order. Missing
    /// context is left as `None`.
    pub fn join(&self, resolved: ResolvedSessions) -> Vec<AggregatedRecord> {
        resolved
            .into_iter()
            .map(|(session_id, experiences)| AggregatedRecord {
                session_id,
                user: self.user(session_id).cloned(),
                session_timestamp: self.timestamp(session_id).map(str::to_string),
                experiences,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiveInPhase, ExperienceEntity, ResolvedExperience};
    use crate::store::InMemoryStore;
    use chrono::TimeZone;

    fn user_doc(user_id: &str, sessions: Vec<SessionId>) -> UserPreferencesDocument {
        UserPreferencesDocument {
            user_id: Some(user_id.to_string()),
            created_at: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            sessions,
        }
    }

    fn experience(key: &str) -> ResolvedExperience {
        ResolvedExperience {
            key: key.to_string(),
            entity: ExperienceEntity::default(),
            phase: DiveInPhase::NotStarted,
        }
    }

    #[test]
    fn test_every_listed_session_maps_to_its_user() {
        let context = SessionContext::from_documents(vec![user_doc("u1", vec![1, 2])], vec![]);
        for id in [1, 2] {
            let user = context.user(id).unwrap();
            assert_eq!(user.user_id.as_deref(), Some("u1"));
            assert_eq!(user.user_created_at.as_deref(), Some("2024-01-02T03:04:05Z"));
        }
        assert!(context.user(3).is_none());
    }

    #[test]
    fn test_later_user_document_wins() {
        let context = SessionContext::from_documents(
            vec![user_doc("first", vec![1]), user_doc("second", vec![1])],
            vec![],
        );
        assert_eq!(context.user(1).unwrap().user_id.as_deref(), Some("second"));
    }

    #[test]
    fn test_sessions_without_timestamp_are_omitted() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let context = SessionContext::from_documents(
            vec![],
            vec![
                SessionStateDocument { session_id: Some(1), conversation_conducted_at: Some(at) },
                SessionStateDocument { session_id: Some(2), conversation_conducted_at: None },
                SessionStateDocument { session_id: None, conversation_conducted_at: Some(at) },
                SessionStateDocument { session_id: Some(0), conversation_conducted_at: Some(at) },
            ],
        );
        assert_eq!(context.timestamp(1), Some("2024-05-01T10:00:00Z"));
        assert_eq!(context.timestamp(2), None);
        assert_eq!(context.timestamp(0), Some("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn test_normalize_keeps_subsecond_precision() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(normalize_timestamp(&at), "2024-05-01T10:00:00.250Z");
    }

    #[test]
    fn test_join_marks_missing_context_unknown() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let context = SessionContext::from_documents(
            vec![user_doc("u1", vec![1])],
            vec![SessionStateDocument { session_id: Some(9), conversation_conducted_at: Some(at) }],
        );

        let mut resolved = ResolvedSessions::new();
        resolved.insert(9, vec![experience("x")]);
        resolved.insert(1, vec![experience("y")]);

        let records = context.join(resolved);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].session_id, 1);
        assert_eq!(records[0].user_id(), Some("u1"));
        assert_eq!(records[0].session_timestamp, None);

        assert_eq!(records[1].session_id, 9);
        assert!(records[1].user.is_none());
        assert_eq!(records[1].user_id(), None);
        assert_eq!(records[1].session_timestamp.as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[tokio::test]
    async fn test_load_reads_both_collections() {
        let store = InMemoryStore::new();
        store.add_user(Some("u1"), None, vec![4]).unwrap();
        store
            .add_session(Some(4), Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()))
            .unwrap();

        let context = SessionContext::load(&store, &store).await.unwrap();
        assert_eq!(context.user(4).unwrap().user_created_at, None);
        assert_eq!(context.timestamp(4), Some("2024-06-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_load_propagates_store_fault() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let err = SessionContext::load(&store, &store).await.unwrap_err();
        assert!(matches!(err, ExportError::Storage(_)));
    }
}
