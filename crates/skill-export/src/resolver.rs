//! Experience resolution: raw per-session state blobs -> typed experiences
//!
//! Every entry of a session's `experiences_state` is parsed on its own. An entry
//! that cannot be parsed is logged and dropped; its siblings are still resolved.
//! Only a store fault or invalid caller input fails a `resolve` call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{EntryError, ExportError, Result};
use crate::model::{ExperienceEntity, PhaseMarker, PhaseSet, ResolvedExperience, SessionId};
use crate::store::ExperienceStateStore;

/// Upper bound on session ids resolved by one call.
pub const DEFAULT_MAX_SESSIONS_PER_QUERY: usize = 10_000;

/// Resolved experiences per session. Sessions with nothing resolved are absent.
pub type ResolvedSessions = BTreeMap<SessionId, Vec<ResolvedExperience>>;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub max_sessions: usize,
    pub phases: PhaseSet,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS_PER_QUERY,
            phases: PhaseSet::default(),
        }
    }
}

/// Outcome of parsing one session's state blob.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResolvedState {
    pub experiences: Vec<ResolvedExperience>,
    /// Entries dropped with a warning.
    pub dropped: usize,
    /// Entries skipped silently because their payload was empty.
    pub empty: usize,
}

pub struct ExperienceResolver {
    store: Arc<dyn ExperienceStateStore>,
    config: ResolverConfig,
}

impl ExperienceResolver {
    pub fn new(store: Arc<dyn ExperienceStateStore>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve the experiences of every session in `session_ids` with a single
    /// batched store lookup.
    pub async fn resolve(&self, session_ids: &[SessionId]) -> Result<ResolvedSessions> {
        if session_ids.is_empty() {
            return Ok(ResolvedSessions::new());
        }
        let unique = self.validate(session_ids)?;

        let documents = self
            .store
            .find_by_session_ids(&unique)
            .await
            .map_err(ExportError::storage)?;

        let mut resolved = ResolvedSessions::new();
        let mut dropped = 0;
        for document in documents {
            if unique.binary_search(&document.session_id).is_err() {
                debug!("Ignoring unrequested session_id {}", document.session_id);
                continue;
            }
            let state = resolve_state(
                document.session_id,
                &document.experiences_state,
                &self.config.phases,
            );
            dropped += state.dropped;
            if !state.experiences.is_empty() {
                resolved.insert(document.session_id, state.experiences);
            }
        }

        info!(
            "Resolved experiences for {} of {} sessions ({} entries dropped)",
            resolved.len(),
            unique.len(),
            dropped
        );
        Ok(resolved)
    }

    /// Rejects negative ids and oversized batches; returns the ids sorted and deduplicated.
    fn validate(&self, session_ids: &[SessionId]) -> Result<Vec<SessionId>> {
        if let Some(&bad) = session_ids.iter().find(|&&id| id < 0) {
            return Err(ExportError::InvalidSessionId(bad));
        }
        let unique: Vec<SessionId> = session_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.len() > self.config.max_sessions {
            return Err(ExportError::BatchTooLarge {
                requested: unique.len(),
                max: self.config.max_sessions,
            });
        }
        Ok(unique)
    }
}

/// Parse every entry of one session's state in stored order.
pub fn resolve_state(
    session_id: SessionId,
    experiences_state: &Map<String, Value>,
    phases: &PhaseSet,
) -> ResolvedState {
    let mut out = ResolvedState::default();
    for (key, entry) in experiences_state {
        match resolve_entry(key, entry, phases) {
            Ok(Some(experience)) => out.experiences.push(experience),
            Ok(None) => out.empty += 1,
            Err(e) => {
                warn!(
                    session_id,
                    experience = %key,
                    "Failed to parse experience for session_id {}: {}",
                    session_id,
                    e
                );
                out.dropped += 1;
            }
        }
    }
    out
}

fn resolve_entry(
    key: &str,
    entry: &Value,
    phases: &PhaseSet,
) -> std::result::Result<Option<ResolvedExperience>, EntryError> {
    let fields = entry.as_object().ok_or(EntryError::NotAnObject)?;

    let phase = PhaseMarker::from_value(fields.get("dive_in_phase"))?.resolve(phases)?;

    let payload = match fields.get("experience") {
        Some(payload) if !is_empty_payload(payload) => payload,
        _ => return Ok(None),
    };
    let entity = ExperienceEntity::deserialize(payload).map_err(EntryError::InvalidPayload)?;

    Ok(Some(ResolvedExperience {
        key: key.to_string(),
        entity,
        phase,
    }))
}

fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
