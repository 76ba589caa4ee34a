//! SQLite-backed document store
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::schema::MIGRATIONS;
use super::{
    ExperienceStateDocument, ExperienceStateStore, SessionStateDocument, SessionStateStore,
    UserPreferencesDocument, UserPreferencesStore,
};
use crate::model::SessionId;

type SqlitePool = Pool<SqliteConnectionManager>;

/// The three collections the export reads, sharing one connection pool.
pub struct ExportDatabase {
    pub experiences: ExperienceStateTable,
    pub users: UserPreferencesTable,
    pub sessions: SessionStateTable,
    schema_version: i32,
}

impl ExportDatabase {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening export database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(db_path).with_flags(
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        );
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        let schema_version = {
            let mut conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )?;
            initialize_schema(&mut conn)?
        };
        info!("Export database ready (schema version {})", schema_version);
        Ok(Self::with_pool(Arc::new(pool), schema_version))
    }

    /// Each in-memory connection is its own database, so the pool holds one.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        let schema_version = {
            let mut conn = pool.get()?;
            initialize_schema(&mut conn)?
        };
        Ok(Self::with_pool(Arc::new(pool), schema_version))
    }

    fn with_pool(pool: Arc<SqlitePool>, schema_version: i32) -> Self {
        Self {
            experiences: ExperienceStateTable { pool: Arc::clone(&pool) },
            users: UserPreferencesTable { pool: Arc::clone(&pool) },
            sessions: SessionStateTable { pool },
            schema_version,
        }
    }

    pub fn schema_version(&self) -> i32 {
        self.schema_version
    }

    /// Split into the three tables, each usable as its own store.
    pub fn into_tables(self) -> (ExperienceStateTable, UserPreferencesTable, SessionStateTable) {
        (self.experiences, self.users, self.sessions)
    }
}

fn initialize_schema(conn: &mut Connection) -> rusqlite::Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    let mut current: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    for (version, sql) in MIGRATIONS {
        if *version > current {
            debug!("Applying migration {}", version);
            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;
            current = *version;
        }
    }
    Ok(current)
}

fn get_conn(pool: &SqlitePool) -> anyhow::Result<PooledConnection<SqliteConnectionManager>> {
    pool.get()
        .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
}

/// Accepts RFC 3339 plus the naive layouts older writers produced (read as UTC).
pub(crate) fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(datetime_str, "%+") {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, layout) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }
    None
}

fn parse_optional_datetime(raw: Option<String>, what: &str) -> Option<DateTime<Utc>> {
    let raw = raw?;
    let parsed = parse_datetime_safe(&raw);
    if parsed.is_none() {
        warn!("Failed to parse {} '{}', treating it as absent", what, raw);
    }
    parsed
}

/// `explore_experiences_director_state`
pub struct ExperienceStateTable {
    pool: Arc<SqlitePool>,
}

impl ExperienceStateTable {
    pub fn upsert(&self, session_id: SessionId, state: &Map<String, Value>) -> anyhow::Result<()> {
        let json = serde_json::to_string(state)?;
        self.upsert_raw(session_id, &json)
    }

    /// Store the state column verbatim, without checking that it is JSON.
    pub fn upsert_raw(&self, session_id: SessionId, experiences_state: &str) -> anyhow::Result<()> {
        let conn = get_conn(&self.pool)?;
        conn.execute(
            "INSERT OR REPLACE INTO explore_experiences_director_state (session_id, experiences_state)
             VALUES (?1, ?2)",
            params![session_id, experiences_state],
        )?;
        Ok(())
    }

    fn parse_state(session_id: SessionId, raw: &str) -> Option<Map<String, Value>> {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(map),
            Ok(Value::Null) => Some(Map::new()),
            Ok(other) => {
                warn!(
                    "experiences_state for session_id {} is a {}, not an object; skipping document",
                    session_id,
                    crate::model::json_type_name(&other)
                );
                None
            }
            Err(e) => {
                warn!(
                    "experiences_state for session_id {} is not valid JSON: {}; skipping document",
                    session_id, e
                );
                None
            }
        }
    }
}

#[async_trait]
impl ExperienceStateStore for ExperienceStateTable {
    async fn find_by_session_ids(
        &self,
        session_ids: &[SessionId],
    ) -> anyhow::Result<Vec<ExperienceStateDocument>> {
        if session_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = get_conn(&self.pool)?;

        // One bound JSON array, so the batch size is not limited by SQLite's
        // host parameter cap.
        let ids_json = serde_json::to_string(session_ids)?;
        let mut stmt = conn.prepare(
            "SELECT session_id, experiences_state
             FROM explore_experiences_director_state
             WHERE session_id IN (SELECT value FROM json_each(?1))
             ORDER BY session_id",
        )?;
        let mut rows = stmt.query(params![ids_json])?;

        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            let session_id: SessionId = row.get(0)?;
            let raw: String = row.get(1)?;
            if let Some(experiences_state) = Self::parse_state(session_id, &raw) {
                documents.push(ExperienceStateDocument {
                    session_id,
                    experiences_state,
                });
            }
        }

        debug!(
            "Fetched {} experience state documents for {} session ids",
            documents.len(),
            session_ids.len()
        );
        Ok(documents)
    }

    async fn list_session_ids(&self) -> anyhow::Result<Vec<SessionId>> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT session_id FROM explore_experiences_director_state ORDER BY session_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<SessionId>>>()?;
        Ok(ids)
    }
}

/// `user_preferences`
pub struct UserPreferencesTable {
    pool: Arc<SqlitePool>,
}

impl UserPreferencesTable {
    pub fn insert(
        &self,
        user_id: Option<&str>,
        created_at: Option<DateTime<Utc>>,
        sessions: &[SessionId],
    ) -> anyhow::Result<i64> {
        let conn = get_conn(&self.pool)?;
        conn.execute(
            "INSERT INTO user_preferences (user_id, created_at, sessions) VALUES (?1, ?2, ?3)",
            params![
                user_id,
                created_at.map(|dt| dt.to_rfc3339()),
                serde_json::to_string(sessions)?,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

#[async_trait]
impl UserPreferencesStore for UserPreferencesTable {
    async fn find_all(&self) -> anyhow::Result<Vec<UserPreferencesDocument>> {
        let conn = get_conn(&self.pool)?;
        let mut stmt =
            conn.prepare("SELECT user_id, created_at, sessions FROM user_preferences ORDER BY id")?;
        let mut rows = stmt.query([])?;

        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            let user_id: Option<String> = row.get(0)?;
            let created_at = parse_optional_datetime(row.get(1)?, "user created_at");
            let sessions_json: String = row.get(2)?;
            let sessions = serde_json::from_str::<Vec<SessionId>>(&sessions_json).unwrap_or_else(|e| {
                warn!(
                    "Invalid sessions list for user {:?}: {}; treating as empty",
                    user_id, e
                );
                Vec::new()
            });
            documents.push(UserPreferencesDocument {
                user_id,
                created_at,
                sessions,
            });
        }
        Ok(documents)
    }
}

/// `agent_director_state`
pub struct SessionStateTable {
    pool: Arc<SqlitePool>,
}

impl SessionStateTable {
    pub fn upsert(
        &self,
        session_id: SessionId,
        conducted_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        let conducted_at = conducted_at.map(|dt| dt.to_rfc3339());
        self.upsert_text(session_id, conducted_at.as_deref())
    }

    pub fn upsert_text(&self, session_id: SessionId, conducted_at: Option<&str>) -> anyhow::Result<()> {
        let conn = get_conn(&self.pool)?;
        conn.execute(
            "INSERT OR REPLACE INTO agent_director_state (session_id, conversation_conducted_at)
             VALUES (?1, ?2)",
            params![session_id, conducted_at],
        )?;
        Ok(())
    }
}

#[async_trait]
impl SessionStateStore for SessionStateTable {
    async fn find_all(&self) -> anyhow::Result<Vec<SessionStateDocument>> {
        let conn = get_conn(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT session_id, conversation_conducted_at FROM agent_director_state ORDER BY session_id",
        )?;
        let mut rows = stmt.query([])?;

        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            let session_id: Option<SessionId> = row.get(0)?;
            let conversation_conducted_at =
                parse_optional_datetime(row.get(1)?, "conversation_conducted_at");
            documents.push(SessionStateDocument {
                session_id,
                conversation_conducted_at,
            });
        }
        Ok(documents)
    }
}
