// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session rows: the persisted half of the session registry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sentinel::Provider;

use super::{epoch_ms, Store};

/// Observable status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Busy,
    Offline,
    Unknown,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "offline" => Ok(Self::Offline),
            "unknown" => Ok(Self::Unknown),
            other => Err(Error::invalid_input(format!("unknown session status: {other}"))),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for SessionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SessionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Self::from_str(text).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// A long-lived worker identified by a unique name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    pub provider: Provider,
    pub status: SessionStatus,
    pub current_task_id: Option<i64>,
    pub last_activity: u64,
    pub working_dir: Option<PathBuf>,
    pub git_branch: Option<String>,
    pub env_vars: BTreeMap<String, String>,
    pub last_output: String,
    pub registered_at: u64,
}

const SESSION_COLUMNS: &str = "name, provider, status, current_task_id, last_activity, \
     working_dir, git_branch, env_vars, last_output, registered_at";

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let provider: String = row.get(1)?;
    let env_vars: String = row.get(7)?;
    Ok(Session {
        name: row.get(0)?,
        provider: Provider::from_str(&provider).unwrap_or(Provider::Unknown),
        status: row.get(2)?,
        current_task_id: row.get(3)?,
        last_activity: row.get(4)?,
        working_dir: row.get::<_, Option<String>>(5)?.map(PathBuf::from),
        git_branch: row.get(6)?,
        env_vars: serde_json::from_str(&env_vars).unwrap_or_default(),
        last_output: row.get(8)?,
        registered_at: row.get(9)?,
    })
}

impl Store {
    /// Register a session on first observation, or refresh its provider.
    pub fn upsert_session(&self, name: &str, provider: Provider) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::invalid_input("session name must not be empty"));
        }
        let now = epoch_ms();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sessions (name, provider, status, last_activity, registered_at) \
             VALUES (?1, ?2, 'unknown', ?3, ?3) \
             ON CONFLICT(name) DO UPDATE SET provider = excluded.provider",
            params![name, provider.as_str(), now],
        )?;
        Ok(())
    }

    pub fn get_session(&self, name: &str) -> Result<Session> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE name = ?1"),
            params![name],
            row_to_session,
        )
        .optional()?
        .ok_or_else(|| Error::not_found(format!("session {name}")))
    }

    pub fn list_sessions(&self, status: Option<SessionStatus>) -> Result<Vec<Session>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE (?1 IS NULL OR status = ?1) ORDER BY name ASC"
        ))?;
        let rows = stmt.query_map(params![status.map(|s| s.as_str())], row_to_session)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Apply one probe observation. `last_activity` is only advanced when the
    /// caller saw the pane output change.
    pub fn update_session_observation(
        &self,
        name: &str,
        status: SessionStatus,
        working_dir: Option<&Path>,
        git_branch: Option<&str>,
        last_output: &str,
        activity_at: Option<u64>,
    ) -> Result<()> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE sessions SET \
               status = ?2, \
               working_dir = COALESCE(?3, working_dir), \
               git_branch = COALESCE(?4, git_branch), \
               last_output = ?5, \
               last_activity = COALESCE(?6, last_activity) \
             WHERE name = ?1",
            params![
                name,
                status,
                working_dir.map(|p| p.to_string_lossy().into_owned()),
                git_branch,
                last_output,
                activity_at,
            ],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("session {name}")));
        }
        Ok(())
    }

    /// Set a session's status and claim in one write.
    pub fn set_session_status(
        &self,
        name: &str,
        status: SessionStatus,
        current_task_id: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE sessions SET status = ?2, current_task_id = ?3 WHERE name = ?1",
            params![name, status, current_task_id],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("session {name}")));
        }
        Ok(())
    }

    /// Merge dispatch-time environment exports into the session's env map.
    pub fn merge_session_env(&self, name: &str, env: &BTreeMap<String, String>) -> Result<()> {
        if env.is_empty() {
            return Ok(());
        }
        let mut session = self.get_session(name)?;
        session.env_vars.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        let serialized = serde_json::to_string(&session.env_vars)
            .map_err(|e| Error::storage(e.to_string()))?;
        let conn = self.conn();
        conn.execute(
            "UPDATE sessions SET env_vars = ?2 WHERE name = ?1",
            params![name, serialized],
        )?;
        Ok(())
    }

    /// Delete a session. Refuses while it still holds a non-terminal prompt.
    pub fn delete_session(&self, name: &str) -> Result<()> {
        let held = self.prompts_held_by(name)?;
        if !held.is_empty() {
            return Err(Error::conflict(format!(
                "session {name} holds {} non-terminal prompt(s)",
                held.len()
            )));
        }
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM sessions WHERE name = ?1", params![name])?;
        if changed == 0 {
            return Err(Error::not_found(format!("session {name}")));
        }
        Ok(())
    }
}
