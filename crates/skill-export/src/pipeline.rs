//! One export run: stores -> resolver -> context join -> projection
use std::sync::Arc;

use tracing::info;

use crate::context::SessionContext;
use crate::error::{ExportError, Result};
use crate::model::{AggregatedRecord, SessionId};
use crate::projection::{project, ExportSummary, Projection, ProjectionMode};
use crate::resolver::{ExperienceResolver, ResolvedSessions, ResolverConfig};
use crate::store::{ExperienceStateStore, ExportDatabase, SessionStateStore, UserPreferencesStore};

pub struct ExportPipeline {
    experiences: Arc<dyn ExperienceStateStore>,
    users: Arc<dyn UserPreferencesStore>,
    sessions: Arc<dyn SessionStateStore>,
    resolver: ExperienceResolver,
}

impl ExportPipeline {
    pub fn new(
        experiences: Arc<dyn ExperienceStateStore>,
        users: Arc<dyn UserPreferencesStore>,
        sessions: Arc<dyn SessionStateStore>,
        config: ResolverConfig,
    ) -> Self {
        let resolver = ExperienceResolver::new(Arc::clone(&experiences), config);
        Self {
            experiences,
            users,
            sessions,
            resolver,
        }
    }

    pub fn from_database(db: ExportDatabase, config: ResolverConfig) -> Self {
        let (experiences, users, sessions) = db.into_tables();
        Self::new(Arc::new(experiences), Arc::new(users), Arc::new(sessions), config)
    }

    pub fn resolver(&self) -> &ExperienceResolver {
        &self.resolver
    }

    /// Export the given sessions. The set must fit in one resolver batch.
    pub async fn run(&self, session_ids: &[SessionId], mode: ProjectionMode) -> Result<Projection> {
        let resolved = self.resolver.resolve(session_ids).await?;
        self.finish(resolved, mode).await
    }

    /// Export every session the experience store knows about, resolved in
    /// batches of at most `max_sessions` ids.
    pub async fn run_all(&self, mode: ProjectionMode) -> Result<Projection> {
        let resolved = self.resolve_all().await?;
        self.finish(resolved, mode).await
    }

    /// Resolve and join without projecting.
    pub async fn aggregate(&self, session_ids: &[SessionId]) -> Result<Vec<AggregatedRecord>> {
        let resolved = self.resolver.resolve(session_ids).await?;
        self.join(resolved).await
    }

    async fn resolve_all(&self) -> Result<ResolvedSessions> {
        let all_ids = self
            .experiences
            .list_session_ids()
            .await
            .map_err(ExportError::storage)?;
        let batch_size = self.resolver.config().max_sessions.max(1);
        info!(
            "Exporting {} stored sessions in batches of {}",
            all_ids.len(),
            batch_size
        );

        let mut resolved = ResolvedSessions::new();
        for (index, chunk) in all_ids.chunks(batch_size).enumerate() {
            info!("Processing batch {} ({} sessions)...", index + 1, chunk.len());
            resolved.extend(self.resolver.resolve(chunk).await?);
        }
        Ok(resolved)
    }

    async fn join(&self, resolved: ResolvedSessions) -> Result<Vec<AggregatedRecord>> {
        if resolved.is_empty() {
            return Ok(Vec::new());
        }
        let context = SessionContext::load(self.users.as_ref(), self.sessions.as_ref()).await?;
        Ok(context.join(resolved))
    }

    async fn finish(&self, resolved: ResolvedSessions, mode: ProjectionMode) -> Result<Projection> {
        let records = self.join(resolved).await?;
        let projection = project(&records, mode);

        let summary = ExportSummary::from_projection(&projection);
        info!(
            "Export summary: {} sessions, {} experiences, {} skills",
            summary.sessions, summary.experiences, summary.skills
        );
        Ok(projection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PhaseSet;
    use crate::store::InMemoryStore;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Map, Value};

    fn state(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("state must be an object"),
        }
    }

    fn completed(title: &str, skills: &[&str]) -> Value {
        json!({
            "dive_in_phase": "DIVE_IN_COMPLETED",
            "experience": {
                "experience_title": title,
                "top_skills": skills
                    .iter()
                    .map(|s| json!({"UUID": s, "preferredLabel": format!("label {s}")}))
                    .collect::<Vec<_>>(),
            }
        })
    }

    fn pipeline(store: &InMemoryStore, max_sessions: usize) -> ExportPipeline {
        let shared = Arc::new(store.clone());
        ExportPipeline::new(
            shared.clone(),
            shared.clone(),
            shared,
            ResolverConfig {
                max_sessions,
                phases: PhaseSet::default(),
            },
        )
    }

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.put_state(1, state(json!({"e1": completed("Chef", &["s1", "s2"])})));
        store.put_state(2, state(json!({"e2": completed("Baker", &[])})));
        store.put_state(3, state(json!({"e3": completed("Driver", &["s3"])})));
        store
            .add_user(
                Some("u1"),
                Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
                vec![1, 2],
            )
            .unwrap();
        store
            .add_session(Some(1), Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()))
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_run_joins_context() {
        let store = seeded();
        let projection = pipeline(&store, 100)
            .run(&[1, 3], ProjectionMode::Nested)
            .await
            .unwrap();

        let Projection::Nested(users) = projection else {
            panic!("expected nested projection");
        };
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].session_id, 1);
        assert_eq!(users[0].user_id.as_deref(), Some("u1"));
        assert_eq!(users[0].session_timestamp.as_deref(), Some("2024-03-01T12:00:00Z"));
        assert_eq!(users[1].session_id, 3);
        assert_eq!(users[1].user_id, None);
    }

    #[tokio::test]
    async fn test_run_all_batches_by_cap() {
        let store = seeded();
        let projection = pipeline(&store, 2).run_all(ProjectionMode::Flat).await.unwrap();

        assert_eq!(store.state_lookups(), 2);
        let Projection::Flat(rows) = projection else {
            panic!("expected flat projection");
        };
        let sessions: Vec<_> = rows.iter().map(|r| r.session_id).collect();
        assert_eq!(sessions, vec![1, 1, 3]);
    }

    #[tokio::test]
    async fn test_run_rejects_oversized_batch() {
        let store = seeded();
        let err = pipeline(&store, 2)
            .run(&[1, 2, 3], ProjectionMode::Nested)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::BatchTooLarge { requested: 3, max: 2 }));
        assert_eq!(store.state_lookups(), 0);
    }

    #[tokio::test]
    async fn test_store_fault_aborts_run() {
        let store = seeded();
        store.set_unavailable(true);
        let err = pipeline(&store, 10).run_all(ProjectionMode::Nested).await.unwrap_err();
        assert!(matches!(err, ExportError::Storage(_)));
    }

    #[tokio::test]
    async fn test_empty_input_yields_empty_projection() {
        let store = seeded();
        let projection = pipeline(&store, 10).run(&[], ProjectionMode::Flat).await.unwrap();
        assert!(projection.is_empty());
        assert_eq!(store.state_lookups(), 0);
    }

    #[tokio::test]
    async fn test_aggregate_keeps_sessions_without_skills() {
        let store = seeded();
        let records = pipeline(&store, 10).aggregate(&[2]).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session_id, 2);
        assert_eq!(records[0].user_id(), Some("u1"));
        assert!(records[0].qualifying_experiences().next().is_none());
    }
}
