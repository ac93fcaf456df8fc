use crate::manager::{MemoryTurn, RawSessionStore};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feather_core::Role;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;

fn role_to_str(role: Role) -> &'static str {
    role.as_str()
}

fn role_from_str(s: &str) -> Role {
    match s {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        "summary" => Role::Summary,
        _ => Role::User,
    }
}

/// SQLite-backed [`RawSessionStore`] (spec §4.9's "persistent backend").
/// Mirrors the teacher's `MemoryDB`: a single connection behind a
/// `std::sync::Mutex`, WAL journal mode, schema created on open.
/// `append`'s atomicity (insert-then-evict in one transaction) is the
/// caller's ([`crate::manager::Memory`]) responsibility — this store only
/// ever does whole-session `load`/`replace`, each inside its own
/// transaction, which is the unit of atomicity a flat append-only table
/// needs here.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create memory db directory: {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open memory db at {}", db_path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=3000;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                tokens INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_memory_turns_session
                ON memory_turns(session_id, id);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE memory_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                tokens INTEGER
             );",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[async_trait]
impl RawSessionStore for SqliteStore {
    async fn load(&self, session_id: &str) -> anyhow::Result<Vec<MemoryTurn>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("memory db lock poisoned: {e}"))?;
        let mut stmt = conn.prepare(
            "SELECT role, content, created_at, tokens FROM memory_turns
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let role: String = row.get(0)?;
            let content: String = row.get(1)?;
            let created_at: String = row.get(2)?;
            let tokens: Option<i64> = row.get(3)?;
            Ok((role, content, created_at, tokens))
        })?;

        let mut turns = Vec::new();
        for row in rows {
            let (role, content, created_at, tokens) = row?;
            turns.push(MemoryTurn {
                role: role_from_str(&role),
                content,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .ok()
                    .map(|d| d.with_timezone(&Utc)),
                tokens: tokens.map(|t| t as u64),
            });
        }
        Ok(turns)
    }

    async fn replace(&self, session_id: &str, turns: Vec<MemoryTurn>) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("memory db lock poisoned: {e}"))?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM memory_turns WHERE session_id = ?1", params![session_id])?;
        for turn in &turns {
            let created_at = turn.created_at.unwrap_or_else(Utc::now).to_rfc3339();
            tx.execute(
                "INSERT INTO memory_turns (session_id, role, content, created_at, tokens)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session_id,
                    role_to_str(turn.role),
                    turn.content,
                    created_at,
                    turn.tokens.map(|t| t as i64),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("memory db lock poisoned: {e}"))?;
        conn.execute("DELETE FROM memory_turns WHERE session_id = ?1", params![session_id])?;
        Ok(())
    }
}
