//! Document stores for the three collections the export reads.
//!
//! The pipeline only depends on the traits here; `sqlite` backs them with an
//! on-disk database and `memory` keeps everything in process.
pub mod schema;
pub mod sqlite;
pub mod memory;

pub use memory::InMemoryStore;
pub use sqlite::{ExportDatabase, ExperienceStateTable, SessionStateTable, UserPreferencesTable};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::model::SessionId;

/// One `explore_experiences_director_state` document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperienceStateDocument {
    pub session_id: SessionId,
    /// Experience key -> `{ "experience": ..., "dive_in_phase": ... }`, in stored order.
    pub experiences_state: Map<String, Value>,
}

/// One `user_preferences` document.
#[derive(Debug, Clone, PartialEq)]
pub struct UserPreferencesDocument {
    pub user_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub sessions: Vec<SessionId>,
}

/// One `agent_director_state` document.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStateDocument {
    pub session_id: Option<SessionId>,
    pub conversation_conducted_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ExperienceStateStore: Send + Sync {
    /// All state documents whose session id is in `session_ids`, in one request.
    async fn find_by_session_ids(
        &self,
        session_ids: &[SessionId],
    ) -> anyhow::Result<Vec<ExperienceStateDocument>>;

    /// Every session id that has a state document, ascending.
    async fn list_session_ids(&self) -> anyhow::Result<Vec<SessionId>>;
}

#[async_trait]
pub trait UserPreferencesStore: Send + Sync {
    async fn find_all(&self) -> anyhow::Result<Vec<UserPreferencesDocument>>;
}

#[async_trait]
pub trait SessionStateStore: Send + Sync {
    async fn find_all(&self) -> anyhow::Result<Vec<SessionStateDocument>>;
}
