//! Output sink: nested projections as pretty JSON, flat ones as CSV
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::projection::{FlatRow, Projection, UserRecord};

/// CSV header, matching the field order of [`FlatRow`].
pub const FLAT_COLUMNS: [&str; 10] = [
    "session_id",
    "user_id",
    "user_created_at",
    "session_timestamp",
    "experience_uuid",
    "experience_title",
    "skill_rank",
    "skill_uuid",
    "skill_model_id",
    "skill_preferred_label",
];

/// Envelope around the nested records.
#[derive(Debug, Serialize)]
pub struct NestedExport<'a> {
    pub export_date: String,
    pub total_users: usize,
    pub database: &'a str,
    pub data: &'a [UserRecord],
}

impl<'a> NestedExport<'a> {
    pub fn new(data: &'a [UserRecord], database: &'a str, export_date: DateTime<Utc>) -> Self {
        Self {
            export_date: export_date.to_rfc3339_opts(SecondsFormat::Micros, true),
            total_users: data.len(),
            database,
            data,
        }
    }
}

pub fn write_json<W: Write>(mut writer: W, export: &NestedExport<'_>) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, export)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn write_csv<W: Write>(writer: W, rows: &[FlatRow]) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv_writer.write_record(FLAT_COLUMNS)?;
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write `projection` to `path`. Returns `false` when there was nothing to
/// write for a flat projection and no file was created.
pub fn write_projection(projection: &Projection, path: &Path, database: &str) -> Result<bool> {
    match projection {
        Projection::Nested(records) => {
            info!("Writing {} user records to {}...", records.len(), path.display());
            let export = NestedExport::new(records, database, Utc::now());
            write_json(BufWriter::new(File::create(path)?), &export)?;
        }
        Projection::Flat(rows) => {
            if rows.is_empty() {
                warn!("No skills data found to export");
                return Ok(false);
            }
            info!("Writing {} rows to {}...", rows.len(), path.display());
            write_csv(BufWriter::new(File::create(path)?), rows)?;
        }
    }
    info!("Export complete! Data saved to {}", path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{ExperienceExport, SkillExport};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn row(rank: usize, user_id: Option<&str>) -> FlatRow {
        FlatRow {
            session_id: 5,
            user_id: user_id.map(str::to_string),
            user_created_at: None,
            session_timestamp: Some("2024-05-01T10:00:00Z".to_string()),
            experience_uuid: "e1".to_string(),
            experience_title: "Chef, \"head\"".to_string(),
            skill_rank: rank,
            skill_uuid: format!("s{rank}"),
            skill_model_id: None,
            skill_preferred_label: "Cooking".to_string(),
        }
    }

    #[test]
    fn test_csv_header_and_empty_cells() {
        let mut out = Vec::new();
        write_csv(&mut out, &[row(1, None), row(2, Some("u1"))]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], FLAT_COLUMNS.join(","));
        assert_eq!(
            lines[1],
            "5,,,2024-05-01T10:00:00Z,e1,\"Chef, \"\"head\"\"\",1,s1,,Cooking"
        );
        assert!(lines[2].starts_with("5,u1,,"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_json_envelope() {
        let records = vec![UserRecord {
            session_id: 42,
            user_id: None,
            user_created_at: None,
            session_timestamp: None,
            experiences: vec![ExperienceExport {
                experience_uuid: "e1".to_string(),
                experience_title: "Café owner".to_string(),
                skills: vec![SkillExport {
                    skill_uuid: "s1".to_string(),
                    skill_model_id: Some("m1".to_string()),
                    preferred_label: "Cooking".to_string(),
                    rank: 1,
                }],
            }],
        }];
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let export = NestedExport::new(&records, "compass", at);

        let mut out = Vec::new();
        write_json(&mut out, &export).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Café owner"));

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["export_date"], "2025-01-01T00:00:00.000000Z");
        assert_eq!(value["total_users"], 1);
        assert_eq!(value["database"], "compass");
        assert_eq!(value["data"][0]["user_id"], serde_json::Value::Null);
        assert_eq!(value["data"][0]["experiences"][0]["skills"][0]["rank"], 1);
    }

    #[test]
    fn test_empty_flat_projection_writes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let written = write_projection(&Projection::Flat(vec![]), &path, "db").unwrap();
        assert!(!written);
        assert!(!path.exists());
    }

    #[test]
    fn test_write_projection_creates_files() {
        let dir = tempdir().unwrap();

        let csv_path = dir.path().join("out.csv");
        assert!(write_projection(&Projection::Flat(vec![row(1, None)]), &csv_path, "db").unwrap());
        assert!(std::fs::read_to_string(&csv_path).unwrap().starts_with("session_id,"));

        let json_path = dir.path().join("out.json");
        assert!(write_projection(&Projection::Nested(vec![]), &json_path, "db").unwrap());
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(value["total_users"], 0);
    }
}
