//! Projection of aggregated records into export shapes.
//!
//! Both shapes come out of one walk over the records: the nested tree is built
//! first and flat rows are its leaves, so the two modes always agree on which
//! sessions and experiences qualify (at least one top skill).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::{AggregatedRecord, ResolvedExperience, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    Nested,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillExport {
    pub skill_uuid: String,
    pub skill_model_id: Option<String>,
    pub preferred_label: String,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceExport {
    pub experience_uuid: String,
    pub experience_title: String,
    pub skills: Vec<SkillExport>,
}

/// One qualifying session with its user context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub session_id: SessionId,
    pub user_id: Option<String>,
    pub user_created_at: Option<String>,
    pub session_timestamp: Option<String>,
    pub experiences: Vec<ExperienceExport>,
}

/// One (session, experience, skill) triple. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRow {
    pub session_id: SessionId,
    pub user_id: Option<String>,
    pub user_created_at: Option<String>,
    pub session_timestamp: Option<String>,
    pub experience_uuid: String,
    pub experience_title: String,
    pub skill_rank: usize,
    pub skill_uuid: String,
    pub skill_model_id: Option<String>,
    pub skill_preferred_label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Nested(Vec<UserRecord>),
    Flat(Vec<FlatRow>),
}

impl Projection {
    pub fn mode(&self) -> ProjectionMode {
        match self {
            Projection::Nested(_) => ProjectionMode::Nested,
            Projection::Flat(_) => ProjectionMode::Flat,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Projection::Nested(records) => records.is_empty(),
            Projection::Flat(rows) => rows.is_empty(),
        }
    }
}

pub fn project(records: &[AggregatedRecord], mode: ProjectionMode) -> Projection {
    let nested = records.iter().filter_map(user_record);
    match mode {
        ProjectionMode::Nested => Projection::Nested(nested.collect()),
        ProjectionMode::Flat => Projection::Flat(nested.flat_map(UserRecord::into_rows).collect()),
    }
}

fn user_record(record: &AggregatedRecord) -> Option<UserRecord> {
    let experiences: Vec<_> = record.qualifying_experiences().map(experience_export).collect();
    if experiences.is_empty() {
        return None;
    }
    Some(UserRecord {
        session_id: record.session_id,
        user_id: record.user_id().map(str::to_string),
        user_created_at: record.user_created_at().map(str::to_string),
        session_timestamp: record.session_timestamp.clone(),
        experiences,
    })
}

fn experience_export(experience: &ResolvedExperience) -> ExperienceExport {
    ExperienceExport {
        experience_uuid: experience.key.clone(),
        experience_title: experience.entity.display_title().to_string(),
        skills: experience
            .entity
            .ranked_skills()
            .map(|(rank, skill)| SkillExport {
                skill_uuid: skill.uuid.clone(),
                skill_model_id: skill.model_id.clone(),
                preferred_label: skill.preferred_label.clone().unwrap_or_default(),
                rank,
            })
            .collect(),
    }
}

impl UserRecord {
    pub fn into_rows(self) -> impl Iterator<Item = FlatRow> {
        let UserRecord {
            session_id,
            user_id,
            user_created_at,
            session_timestamp,
            experiences,
        } = self;
        experiences.into_iter().flat_map(move |experience| {
            let user_id = user_id.clone();
            let user_created_at = user_created_at.clone();
            let session_timestamp = session_timestamp.clone();
            let ExperienceExport {
                experience_uuid,
                experience_title,
                skills,
            } = experience;
            skills.into_iter().map(move |skill| FlatRow {
                session_id,
                user_id: user_id.clone(),
                user_created_at: user_created_at.clone(),
                session_timestamp: session_timestamp.clone(),
                experience_uuid: experience_uuid.clone(),
                experience_title: experience_title.clone(),
                skill_rank: skill.rank,
                skill_uuid: skill.skill_uuid,
                skill_model_id: skill.skill_model_id,
                skill_preferred_label: skill.preferred_label,
            })
        })
    }
}

/// Counts logged after an export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub sessions: usize,
    pub experiences: usize,
    pub skills: usize,
}

impl ExportSummary {
    pub fn from_projection(projection: &Projection) -> Self {
        match projection {
            Projection::Nested(records) => Self {
                sessions: records.len(),
                experiences: records.iter().map(|r| r.experiences.len()).sum(),
                skills: records
                    .iter()
                    .flat_map(|r| &r.experiences)
                    .map(|e| e.skills.len())
                    .sum(),
            },
            Projection::Flat(rows) => Self {
                sessions: rows.iter().map(|r| r.session_id).collect::<HashSet<_>>().len(),
                experiences: rows
                    .iter()
                    .map(|r| (r.session_id, r.experience_uuid.as_str()))
                    .collect::<HashSet<_>>()
                    .len(),
                skills: rows.len(),
            },
        }
    }
}
