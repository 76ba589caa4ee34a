//! SQLite schema for the exported collections

/// Versioned migrations, applied in order.
pub const MIGRATIONS: &[(i32, &str)] = &[(1, SCHEMA_V1)];

const SCHEMA_V1: &str = "
-- Per-session experience state, one document per session
CREATE TABLE IF NOT EXISTS explore_experiences_director_state (
    session_id INTEGER PRIMARY KEY,
    experiences_state TEXT NOT NULL DEFAULT '{}'
);
-- User preferences; sessions is a JSON array of session ids
CREATE TABLE IF NOT EXISTS user_preferences (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT,
    created_at TIMESTAMP,
    sessions TEXT NOT NULL DEFAULT '[]'
);
-- Agent director state, carries when the conversation was conducted
CREATE TABLE IF NOT EXISTS agent_director_state (
    session_id INTEGER PRIMARY KEY,
    conversation_conducted_at TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_user_preferences_user ON user_preferences (user_id);
";
