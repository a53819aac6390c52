// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt rows: the ordered backlog and its state machine.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{named_params, params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sentinel::Provider;

use super::{epoch_ms, Store, MAX_CONTENT_BYTES, PRIORITY_RANGE};

/// Lifecycle state of a prompt.
///
/// The only legal edges are `pending → assigned → in_progress → terminal`
/// plus `failed → pending` through the retry driver. Terminal states are
/// monotone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptState {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl PromptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl FromStr for PromptState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::invalid_input(format!("unknown prompt state: {other}"))),
        }
    }
}

impl std::fmt::Display for PromptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for PromptState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for PromptState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Self::from_str(text).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Structured prompt metadata. Unknown fields are rejected at submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PromptMetadata {
    pub working_dir: Option<PathBuf>,
    pub env_vars: BTreeMap<String, String>,
    pub prerequisites: Vec<String>,
    pub git_branch: Option<String>,
}

/// Fields accepted from a producer at submission time. Unknown fields are
/// rejected rather than silently carried along.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewPrompt {
    pub content: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target_session: Option<String>,
    #[serde(default)]
    pub target_provider: Option<Provider>,
    #[serde(default = "NewPrompt::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "NewPrompt::default_timeout_minutes")]
    pub timeout_minutes: u32,
    #[serde(default)]
    pub metadata: PromptMetadata,
}

impl NewPrompt {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            priority: 0,
            source: String::new(),
            target_session: None,
            target_provider: None,
            max_retries: Self::default_max_retries(),
            timeout_minutes: Self::default_timeout_minutes(),
            metadata: PromptMetadata::default(),
        }
    }

    fn default_max_retries() -> u32 {
        3
    }

    fn default_timeout_minutes() -> u32 {
        30
    }
}

/// A unit of work as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: i64,
    pub content: String,
    pub priority: i64,
    pub source: String,
    pub target_session: Option<String>,
    pub target_provider: Option<Provider>,
    pub status: PromptState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_minutes: u32,
    pub assigned_session: Option<String>,
    pub error: Option<String>,
    pub response: Option<String>,
    pub cancel_requested: bool,
    pub metadata: PromptMetadata,
    pub created_at: u64,
    pub assigned_at: Option<u64>,
    pub completed_at: Option<u64>,
}

impl Prompt {
    /// Deadline for the current attempt, in epoch millis.
    pub fn deadline(&self) -> Option<u64> {
        self.assigned_at.map(|at| at + u64::from(self.timeout_minutes) * 60_000)
    }
}

/// A conditional state change applied by [`Store::transition`].
#[derive(Debug, Clone, Default)]
pub struct Transition {
    pub to: Option<PromptState>,
    pub assigned_session: Option<String>,
    pub error: Option<String>,
    pub response: Option<String>,
    pub bump_retry: bool,
}

impl Transition {
    pub fn to(state: PromptState) -> Self {
        Self { to: Some(state), ..Self::default() }
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.assigned_session = Some(session.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn bump_retry(mut self) -> Self {
        self.bump_retry = true;
        self
    }
}

/// Queue and session counts for the inspection API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub assigned: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub sessions_by_status: BTreeMap<String, i64>,
}

const PROMPT_COLUMNS: &str = "id, content, priority, source, target_session, target_provider, \
     status, retry_count, max_retries, timeout_minutes, assigned_session, error, response, \
     cancel_requested, working_dir, git_branch, env_vars, prerequisites, \
     created_at, assigned_at, completed_at";

fn row_to_prompt(row: &rusqlite::Row<'_>) -> rusqlite::Result<Prompt> {
    let provider: Option<String> = row.get(5)?;
    let env_vars: String = row.get(16)?;
    let prerequisites: String = row.get(17)?;
    Ok(Prompt {
        id: row.get(0)?,
        content: row.get(1)?,
        priority: row.get(2)?,
        source: row.get(3)?,
        target_session: row.get(4)?,
        target_provider: provider
            .as_deref()
            .map(|p| Provider::from_str(p).unwrap_or(Provider::Unknown)),
        status: row.get(6)?,
        retry_count: row.get(7)?,
        max_retries: row.get(8)?,
        timeout_minutes: row.get(9)?,
        assigned_session: row.get(10)?,
        error: row.get(11)?,
        response: row.get(12)?,
        cancel_requested: row.get::<_, i64>(13)? != 0,
        metadata: PromptMetadata {
            working_dir: row.get::<_, Option<String>>(14)?.map(PathBuf::from),
            git_branch: row.get(15)?,
            env_vars: serde_json::from_str(&env_vars).unwrap_or_default(),
            prerequisites: serde_json::from_str(&prerequisites).unwrap_or_default(),
        },
        created_at: row.get(18)?,
        assigned_at: row.get(19)?,
        completed_at: row.get(20)?,
    })
}

impl Store {
    /// Insert a new prompt in `pending`, returning its id.
    pub fn enqueue(&self, new: &NewPrompt) -> Result<i64> {
        if new.content.trim().is_empty() {
            return Err(Error::invalid_input("content must not be empty"));
        }
        if new.content.len() > MAX_CONTENT_BYTES {
            return Err(Error::invalid_input(format!(
                "content exceeds {MAX_CONTENT_BYTES} bytes"
            )));
        }
        if !PRIORITY_RANGE.contains(&new.priority) {
            return Err(Error::invalid_input(format!(
                "priority {} outside {:?}",
                new.priority, PRIORITY_RANGE
            )));
        }
        let timeout_minutes = new.timeout_minutes.max(1);
        let env_vars = serde_json::to_string(&new.metadata.env_vars)
            .map_err(|e| Error::invalid_input(e.to_string()))?;
        let prerequisites = serde_json::to_string(&new.metadata.prerequisites)
            .map_err(|e| Error::invalid_input(e.to_string()))?;

        let conn = self.conn();
        conn.execute(
            "INSERT INTO prompts (content, priority, source, target_session, target_provider, \
             status, max_retries, timeout_minutes, working_dir, git_branch, env_vars, \
             prerequisites, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                new.content,
                new.priority,
                new.source,
                new.target_session,
                new.target_provider.map(|p| p.as_str()),
                new.max_retries,
                timeout_minutes,
                new.metadata.working_dir.as_ref().map(|p| p.to_string_lossy().into_owned()),
                new.metadata.git_branch,
                env_vars,
                prerequisites,
                epoch_ms(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_prompt(&self, id: i64) -> Result<Prompt> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PROMPT_COLUMNS} FROM prompts WHERE id = ?1"),
            params![id],
            row_to_prompt,
        )
        .optional()?
        .ok_or_else(|| Error::not_found(format!("prompt {id}")))
    }

    /// Atomically select the best pending prompt matching `session`/`provider`
    /// and move it to `assigned`. Returns `None` when the backlog has nothing
    /// for this session.
    pub fn claim_next(&self, session: &str, provider: Provider) -> Result<Option<Prompt>> {
        let id = {
            let mut conn = self.conn();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM prompts \
                     WHERE status = 'pending' \
                       AND (target_session IS NULL OR target_session = ?1) \
                       AND (target_provider IS NULL OR target_provider = ?2) \
                     ORDER BY priority DESC, created_at ASC, id ASC LIMIT 1",
                    params![session, provider.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = id {
                tx.execute(
                    "UPDATE prompts SET status = 'assigned', assigned_session = ?1, \
                     assigned_at = ?2 WHERE id = ?3 AND status = 'pending'",
                    params![session, epoch_ms(), id],
                )?;
            }
            tx.commit()?;
            id
        };
        match id {
            Some(id) => Ok(Some(self.get_prompt(id)?)),
            None => Ok(None),
        }
    }

    /// Conditionally apply `t` to prompt `id`, failing with `Conflict` when
    /// the current state is not in `from`.
    pub fn transition(&self, id: i64, from: &[PromptState], t: &Transition) -> Result<()> {
        let to = t.to.ok_or_else(|| Error::invalid_input("transition without target state"))?;
        let from_list =
            from.iter().map(|s| format!("'{}'", s.as_str())).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "UPDATE prompts SET \
               status = :to, \
               assigned_session = CASE WHEN :to = 'pending' THEN NULL \
                   ELSE COALESCE(:session, assigned_session) END, \
               assigned_at = CASE WHEN :to = 'assigned' THEN :now \
                   WHEN :to = 'pending' THEN NULL ELSE assigned_at END, \
               completed_at = CASE WHEN :to IN ('completed', 'failed', 'cancelled') THEN :now \
                   ELSE completed_at END, \
               error = COALESCE(:error, error), \
               response = COALESCE(:response, response), \
               retry_count = retry_count + :bump, \
               cancel_requested = CASE WHEN :to IN ('completed', 'failed', 'cancelled') THEN 0 \
                   ELSE cancel_requested END \
             WHERE id = :id AND status IN ({from_list})"
        );
        let conn = self.conn();
        let changed = conn.execute(
            &sql,
            named_params! {
                ":to": to,
                ":session": t.assigned_session,
                ":now": epoch_ms(),
                ":error": t.error,
                ":response": t.response,
                ":bump": i64::from(t.bump_retry),
                ":id": id,
            },
        )?;
        if changed == 0 {
            let status: Option<PromptState> = conn
                .query_row("SELECT status FROM prompts WHERE id = ?1", params![id], |r| r.get(0))
                .optional()?;
            return match status {
                None => Err(Error::not_found(format!("prompt {id}"))),
                Some(s) => Err(Error::conflict(format!(
                    "prompt {id} is {s}, expected one of [{from_list}]"
                ))),
            };
        }
        Ok(())
    }

    /// Record a cancellation intent on a prompt already handed to a session.
    pub fn set_cancel_requested(&self, id: i64) -> Result<()> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE prompts SET cancel_requested = 1 \
             WHERE id = ?1 AND status IN ('assigned', 'in_progress')",
            params![id],
        )?;
        if changed == 0 {
            let status: Option<PromptState> = conn
                .query_row("SELECT status FROM prompts WHERE id = ?1", params![id], |r| r.get(0))
                .optional()?;
            return match status {
                None => Err(Error::not_found(format!("prompt {id}"))),
                Some(s) => Err(Error::conflict(format!("prompt {id} is {s}"))),
            };
        }
        Ok(())
    }

    /// Backlog view: pending prompts in dispatch order.
    pub fn list_pending(&self, limit: usize) -> Result<Vec<Prompt>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROMPT_COLUMNS} FROM prompts WHERE status = 'pending' \
             ORDER BY priority DESC, created_at ASC, id ASC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], row_to_prompt)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_prompts(
        &self,
        status: Option<PromptState>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Prompt>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROMPT_COLUMNS} FROM prompts \
             WHERE (?1 IS NULL OR status = ?1) \
             ORDER BY id DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(
            params![status.map(|s| s.as_str()), limit as i64, offset as i64],
            row_to_prompt,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Prompts in `failed` eligible for the retry driver's inspection.
    pub fn list_failed_retryable(&self) -> Result<Vec<Prompt>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROMPT_COLUMNS} FROM prompts \
             WHERE status = 'failed' AND retry_count < max_retries \
             ORDER BY completed_at ASC"
        ))?;
        let rows = stmt.query_map([], row_to_prompt)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Non-terminal prompts assigned to `session`.
    pub fn prompts_held_by(&self, session: &str) -> Result<Vec<Prompt>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROMPT_COLUMNS} FROM prompts \
             WHERE assigned_session = ?1 AND status IN ('assigned', 'in_progress') \
             ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![session], row_to_prompt)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Pending prompts carrying a cancellation intent (a dispatch rollback
    /// can race a cancel); the sweep terminates these directly.
    pub fn pending_cancel_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id FROM prompts WHERE status = 'pending' AND cancel_requested = 1")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Ids of prompts stranded in `assigned` (crash recovery).
    pub fn assigned_prompt_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM prompts WHERE status = 'assigned'")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn stats(&self) -> Result<QueueStats> {
        let conn = self.conn();
        let mut stats = QueueStats::default();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM prompts GROUP BY status")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, PromptState>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            match status {
                PromptState::Pending => stats.pending = count,
                PromptState::Assigned => stats.assigned = count,
                PromptState::InProgress => stats.in_progress = count,
                PromptState::Completed => stats.completed = count,
                PromptState::Failed => stats.failed = count,
                PromptState::Cancelled => stats.cancelled = count,
            }
        }
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sessions GROUP BY status")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            stats.sessions_by_status.insert(status, count);
        }
        Ok(stats)
    }

    /// Remove terminal prompts older than `cutoff_ms`. Returns rows removed.
    pub fn cleanup_terminal(&self, cutoff_ms: u64) -> Result<usize> {
        let conn = self.conn();
        let removed = conn.execute(
            "DELETE FROM prompts \
             WHERE status IN ('completed', 'failed', 'cancelled') \
               AND COALESCE(completed_at, created_at) < ?1",
            params![cutoff_ms],
        )?;
        Ok(removed)
    }
}
