//! Domain types shared by the resolver, the joiner and the projector
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::EntryError;

/// Conversation session identifier. Never negative.
pub type SessionId = i64;

/// Stage reached while the user was guided through one experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiveInPhase {
    NotStarted,
    ExploringSkills,
    LinkingRanking,
    DiveInCompleted,
}

impl DiveInPhase {
    pub const ALL: [DiveInPhase; 4] = [
        DiveInPhase::NotStarted,
        DiveInPhase::ExploringSkills,
        DiveInPhase::LinkingRanking,
        DiveInPhase::DiveInCompleted,
    ];

    /// Symbolic name as stored in the experience state documents.
    pub fn name(&self) -> &'static str {
        match self {
            DiveInPhase::NotStarted => "NOT_STARTED",
            DiveInPhase::ExploringSkills => "EXPLORING_SKILLS",
            DiveInPhase::LinkingRanking => "LINKING_RANKING",
            DiveInPhase::DiveInCompleted => "DIVE_IN_COMPLETED",
        }
    }

    pub fn ordinal(&self) -> i64 {
        match self {
            DiveInPhase::NotStarted => 0,
            DiveInPhase::ExploringSkills => 1,
            DiveInPhase::LinkingRanking => 2,
            DiveInPhase::DiveInCompleted => 3,
        }
    }

    pub fn from_ordinal(ordinal: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.ordinal() == ordinal)
    }
}

impl fmt::Display for DiveInPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DiveInPhase {
    type Err = EntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| EntryError::UnknownPhase(s.to_string()))
    }
}

/// The set of phase names a run accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSet {
    phases: HashSet<DiveInPhase>,
}

impl PhaseSet {
    /// Build from symbolic names. Fails on the first name that is not a phase.
    pub fn from_names<I, S>(names: I) -> Result<Self, EntryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phases = names
            .into_iter()
            .map(|name| name.as_ref().trim().parse())
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(Self { phases })
    }

    pub fn lookup(&self, name: &str) -> Option<DiveInPhase> {
        name.parse::<DiveInPhase>()
            .ok()
            .filter(|phase| self.phases.contains(phase))
    }

    pub fn contains(&self, phase: DiveInPhase) -> bool {
        self.phases.contains(&phase)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Names in ordinal order, for logging.
    pub fn names(&self) -> Vec<&'static str> {
        let mut phases: Vec<_> = self.phases.iter().copied().collect();
        phases.sort();
        phases.into_iter().map(|p| p.name()).collect()
    }
}

impl Default for PhaseSet {
    fn default() -> Self {
        Self {
            phases: DiveInPhase::ALL.into_iter().collect(),
        }
    }
}

/// Raw `dive_in_phase` marker as it arrives from storage: either a symbolic
/// name still to be looked up, or an already resolved phase (stored as its
/// ordinal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseMarker {
    Name(String),
    Resolved(DiveInPhase),
}

impl PhaseMarker {
    pub fn from_value(value: Option<&Value>) -> Result<Self, EntryError> {
        match value {
            None | Some(Value::Null) => Err(EntryError::MissingPhase),
            Some(Value::String(name)) => Ok(PhaseMarker::Name(name.clone())),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(ordinal) => DiveInPhase::from_ordinal(ordinal)
                    .map(PhaseMarker::Resolved)
                    .ok_or(EntryError::UnknownPhaseOrdinal(ordinal)),
                None => Err(EntryError::InvalidPhaseType("non-integer number")),
            },
            Some(other) => Err(EntryError::InvalidPhaseType(json_type_name(other))),
        }
    }

    /// Names are checked against `phases`; resolved values are taken as-is.
    pub fn resolve(&self, phases: &PhaseSet) -> Result<DiveInPhase, EntryError> {
        match self {
            PhaseMarker::Name(name) => phases
                .lookup(name)
                .ok_or_else(|| EntryError::UnknownPhase(name.clone())),
            PhaseMarker::Resolved(phase) => Ok(*phase),
        }
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Responsibilities {
    #[serde(default, deserialize_with = "null_as_default")]
    pub responsibilities: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub non_responsibilities: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub other_peoples_responsibilities: Vec<String>,
}

/// A skill inferred for an experience.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillEntity {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "modelId", default)]
    pub model_id: Option<String>,
    #[serde(rename = "preferredLabel", default)]
    pub preferred_label: Option<String>,
    #[serde(rename = "altLabels", default, deserialize_with = "null_as_default")]
    pub alt_labels: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "skillType", default)]
    pub skill_type: Option<String>,
}

/// Typed experience payload. Unknown keys are ignored; a present key of the
/// wrong type fails construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceEntity {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub experience_title: Option<String>,
    /// Legacy title field written by older agents.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub timeline: Option<Timeline>,
    #[serde(default)]
    pub work_type: Option<String>,
    #[serde(default)]
    pub responsibilities: Option<Responsibilities>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub top_skills: Vec<SkillEntity>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl ExperienceEntity {
    /// `experience_title` unless absent or empty, then the legacy `title`.
    pub fn display_title(&self) -> &str {
        self.experience_title
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(self.title.as_deref())
            .unwrap_or("")
    }

    /// Top skills paired with their 1-based rank.
    pub fn ranked_skills(&self) -> impl Iterator<Item = (usize, &SkillEntity)> {
        self.top_skills.iter().enumerate().map(|(idx, s)| (idx + 1, s))
    }

    pub fn has_skills(&self) -> bool {
        !self.top_skills.is_empty()
    }
}

/// One experience resolved from a session's state, keyed by its entry key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedExperience {
    pub key: String,
    pub entity: ExperienceEntity,
    pub phase: DiveInPhase,
}

/// User identity attached to a session through the user-preferences collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: Option<String>,
    pub user_created_at: Option<String>,
}

/// A session's resolved experiences joined with its context.
/// `None` marks context that is unknown for this session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRecord {
    pub session_id: SessionId,
    pub user: Option<UserContext>,
    pub session_timestamp: Option<String>,
    pub experiences: Vec<ResolvedExperience>,
}

impl AggregatedRecord {
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().and_then(|u| u.user_id.as_deref())
    }

    pub fn user_created_at(&self) -> Option<&str> {
        self.user.as_ref().and_then(|u| u.user_created_at.as_deref())
    }

    /// Experiences that carry at least one top skill.
    pub fn qualifying_experiences(&self) -> impl Iterator<Item = &ResolvedExperience> {
        self.experiences.iter().filter(|e| e.entity.has_skills())
    }
}
