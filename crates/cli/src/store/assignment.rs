// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only assignment log: one row per prompt state transition.

use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{epoch_ms, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentAction {
    Assigned,
    Started,
    Completed,
    Failed,
    TimedOut,
    Requeued,
    Retried,
    Cancelled,
}

impl AssignmentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Requeued => "requeued",
            Self::Retried => "retried",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for AssignmentAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "assigned" => Ok(Self::Assigned),
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            "requeued" => Ok(Self::Requeued),
            "retried" => Ok(Self::Retried),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::invalid_input(format!("unknown assignment action: {other}"))),
        }
    }
}

impl ToSql for AssignmentAction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AssignmentAction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Self::from_str(text).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// One audit row. References prompts and sessions by id/name only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub id: i64,
    pub prompt_id: i64,
    pub session_name: String,
    pub action: AssignmentAction,
    pub details: String,
    pub created_at: u64,
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssignmentRecord> {
    Ok(AssignmentRecord {
        id: row.get(0)?,
        prompt_id: row.get(1)?,
        session_name: row.get(2)?,
        action: row.get(3)?,
        details: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl Store {
    pub fn log_assignment(
        &self,
        prompt_id: i64,
        session_name: &str,
        action: AssignmentAction,
        details: &str,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO assignments (prompt_id, session_name, action, details, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![prompt_id, session_name, action, details, epoch_ms()],
        )?;
        Ok(())
    }

    /// History for a prompt, a session, or both; newest first.
    pub fn assignment_history(
        &self,
        prompt_id: Option<i64>,
        session_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AssignmentRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, prompt_id, session_name, action, details, created_at FROM assignments \
             WHERE (?1 IS NULL OR prompt_id = ?1) AND (?2 IS NULL OR session_name = ?2) \
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![prompt_id, session_name, limit as i64], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Drop log rows older than `cutoff_ms`. Returns rows removed.
    pub fn prune_assignments(&self, cutoff_ms: u64) -> Result<usize> {
        let conn = self.conn();
        let removed =
            conn.execute("DELETE FROM assignments WHERE created_at < ?1", params![cutoff_ms])?;
        Ok(removed)
    }
}
