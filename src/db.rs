//! SQLite connection setup and schema migrations.
//!
//! The schema version lives in `PRAGMA user_version`. Each entry of
//! [`MIGRATIONS`] runs once, inside its own transaction, in order.

use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use crate::error::CoreResult;

const V1_TABLES: &str = "
CREATE TABLE IF NOT EXISTS questions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    board           TEXT NOT NULL,
    subject         TEXT NOT NULL,
    competition     TEXT,
    year            INTEGER,
    body            TEXT NOT NULL UNIQUE,
    format          TEXT NOT NULL CHECK (format IN ('binary', 'choice')),
    answer_key      TEXT NOT NULL,
    trap_annotation TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS competitions (
    name         TEXT PRIMARY KEY,
    status       TEXT NOT NULL,
    likely_board TEXT NOT NULL,
    vacancies    TEXT NOT NULL,
    salary       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS subjects (
    name TEXT PRIMARY KEY
);

-- score stays NULL until the attempt is finalized
CREATE TABLE IF NOT EXISTS attempts (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id       TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    competition    TEXT,
    board          TEXT NOT NULL,
    subject        TEXT NOT NULL,
    question_count INTEGER NOT NULL,
    score          REAL,
    finalized_at   TEXT
);

CREATE TABLE IF NOT EXISTS exam_questions (
    attempt_id  INTEGER NOT NULL REFERENCES attempts(id),
    question_id INTEGER NOT NULL REFERENCES questions(id),
    position    INTEGER NOT NULL,
    PRIMARY KEY (attempt_id, question_id)
);

CREATE TABLE IF NOT EXISTS answers (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    attempt_id  INTEGER NOT NULL REFERENCES attempts(id),
    question_id INTEGER NOT NULL REFERENCES questions(id),
    submitted   TEXT NOT NULL,
    is_correct  INTEGER NOT NULL,
    UNIQUE (attempt_id, question_id)
);
";

const V2_INDEXES: &str = "
CREATE INDEX IF NOT EXISTS questions_filter_idx ON questions(board, subject);
CREATE INDEX IF NOT EXISTS attempts_owner_idx ON attempts(owner_id, created_at);
CREATE INDEX IF NOT EXISTS answers_attempt_idx ON answers(attempt_id);
";

/// Ordered schema migrations; index + 1 is the resulting `user_version`.
pub const MIGRATIONS: &[&str] = &[V1_TABLES, V2_INDEXES];

/// Open (or create) the database file and bring its schema up to date.
pub fn open_database(db_path: impl AsRef<Path>) -> CoreResult<Connection> {
    let mut conn = Connection::open(db_path.as_ref())?;
    configure(&mut conn)?;
    Ok(conn)
}

/// Fresh in-memory database, used by tests and throwaway sessions.
pub fn open_in_memory() -> CoreResult<Connection> {
    let mut conn = Connection::open_in_memory()?;
    configure(&mut conn)?;
    Ok(conn)
}

fn configure(conn: &mut Connection) -> CoreResult<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    migrate(conn)?;
    Ok(())
}

pub fn schema_version(conn: &Connection) -> CoreResult<usize> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(usize::try_from(version).unwrap_or(0))
}

/// Apply every migration newer than the stored schema version.
/// Returns how many were applied.
pub fn migrate(conn: &mut Connection) -> CoreResult<usize> {
    let current = schema_version(conn)?;
    let mut applied = 0;
    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current) {
        let version = index + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version as i64)?;
        tx.commit()?;
        info!(version, "applied schema migration");
        applied += 1;
    }
    Ok(applied)
}
