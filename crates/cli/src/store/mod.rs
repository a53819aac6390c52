// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed persistent store.
//!
//! All durable state (prompts, sessions, the assignment log, and directory
//! locks) lives here. A single connection guarded by a mutex is the
//! serialization point: `claim_next` and `acquire_lock` run as transactions
//! on that connection, so two concurrent callers can never claim the same
//! row. Every in-memory view elsewhere in the crate is reconstructable from
//! this store.

mod assignment;
mod lock;
mod prompt;
mod session;

pub use assignment::{AssignmentAction, AssignmentRecord};
pub use lock::{DirLock, LockState};
pub use prompt::{NewPrompt, Prompt, PromptMetadata, PromptState, QueueStats, Transition};
pub use session::{Session, SessionStatus};

use std::path::Path;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;

use crate::error::Result;

/// Maximum accepted prompt content, in bytes.
pub const MAX_CONTENT_BYTES: usize = 100_000;

/// Accepted priority range, inclusive.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<i64> = -10..=10;

/// Ordered, idempotent schema migrations keyed on `PRAGMA user_version`.
const MIGRATIONS: &[&str] = &[
    // v1: initial schema.
    "
    CREATE TABLE IF NOT EXISTS prompts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        source TEXT NOT NULL DEFAULT '',
        target_session TEXT,
        target_provider TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 3,
        timeout_minutes INTEGER NOT NULL DEFAULT 30,
        assigned_session TEXT,
        error TEXT,
        response TEXT,
        cancel_requested INTEGER NOT NULL DEFAULT 0,
        working_dir TEXT,
        git_branch TEXT,
        env_vars TEXT NOT NULL DEFAULT '{}',
        prerequisites TEXT NOT NULL DEFAULT '[]',
        created_at INTEGER NOT NULL,
        assigned_at INTEGER,
        completed_at INTEGER
    );
    CREATE TABLE IF NOT EXISTS sessions (
        name TEXT PRIMARY KEY,
        provider TEXT NOT NULL DEFAULT 'unknown',
        status TEXT NOT NULL DEFAULT 'unknown',
        current_task_id INTEGER,
        last_activity INTEGER NOT NULL,
        working_dir TEXT,
        git_branch TEXT,
        env_vars TEXT NOT NULL DEFAULT '{}',
        last_output TEXT NOT NULL DEFAULT '',
        registered_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS assignments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        prompt_id INTEGER NOT NULL,
        session_name TEXT NOT NULL,
        action TEXT NOT NULL,
        details TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS locks (
        id TEXT PRIMARY KEY,
        path TEXT NOT NULL,
        owner_session TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_prompts_backlog
        ON prompts(status, priority DESC, created_at ASC);
    CREATE INDEX IF NOT EXISTS idx_prompts_assigned ON prompts(assigned_session);
    CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
    CREATE INDEX IF NOT EXISTS idx_locks_path ON locks(path, status);
    CREATE INDEX IF NOT EXISTS idx_assignments_prompt ON assignments(prompt_id);
    ",
];

/// Handle to the SQLite database. Cheap to share via `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and bring the schema
    /// up to date.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        let version: i64 =
            conn.query_row("SELECT * FROM pragma_user_version", [], |row| row.get(0))?;
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            let target = i as i64 + 1;
            if version < target {
                conn.execute_batch(&format!(
                    "BEGIN; {migration}; PRAGMA user_version = {target}; COMMIT;"
                ))?;
            }
        }
        Ok(())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

/// Current UTC time as milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
