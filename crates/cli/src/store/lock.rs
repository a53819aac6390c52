// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Directory lock rows.
//!
//! "A lock exists" and "a session claims it" are a single transaction here;
//! there are no filesystem lock files. For any path at most one row is
//! `active` with a future `expires_at`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{epoch_ms, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Active,
    Released,
    Expired,
}

impl LockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Released => "released",
            Self::Expired => "expired",
        }
    }
}

impl FromStr for LockState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "released" => Ok(Self::Released),
            "expired" => Ok(Self::Expired),
            other => Err(Error::invalid_input(format!("unknown lock state: {other}"))),
        }
    }
}

impl ToSql for LockState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for LockState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Self::from_str(text).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// An exclusive lease over a filesystem path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirLock {
    pub id: String,
    pub path: PathBuf,
    pub owner_session: String,
    pub status: LockState,
    pub created_at: u64,
    pub expires_at: u64,
}

const LOCK_COLUMNS: &str = "id, path, owner_session, status, created_at, expires_at";

fn row_to_lock(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirLock> {
    Ok(DirLock {
        id: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        owner_session: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        expires_at: row.get(5)?,
    })
}

impl Store {
    /// Acquire an exclusive lease on `path` for `owner`.
    ///
    /// `Busy` iff another owner's lease on the path has not expired. An
    /// expired lease is stolen in the same transaction. Re-acquiring by the
    /// current owner renews the existing lease.
    pub fn acquire_lock(&self, path: &Path, owner: &str, ttl_secs: u64) -> Result<DirLock> {
        let now = epoch_ms();
        let expires_at = now + ttl_secs.saturating_mul(1000);
        let path_text = path.to_string_lossy().into_owned();

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing: Option<DirLock> = tx
            .query_row(
                &format!(
                    "SELECT {LOCK_COLUMNS} FROM locks \
                     WHERE path = ?1 AND status = 'active' LIMIT 1"
                ),
                params![path_text],
                row_to_lock,
            )
            .optional()?;

        let lock = match existing {
            Some(lock) if lock.expires_at > now && lock.owner_session != owner => {
                tx.commit()?;
                return Err(Error::busy(format!(
                    "{} is locked by {} until {}",
                    path.display(),
                    lock.owner_session,
                    lock.expires_at
                )));
            }
            Some(lock) if lock.expires_at > now => {
                // Re-entrant acquire by the same owner extends the lease.
                tx.execute(
                    "UPDATE locks SET expires_at = ?2 WHERE id = ?1",
                    params![lock.id, expires_at],
                )?;
                DirLock { expires_at, ..lock }
            }
            other => {
                if let Some(expired) = other {
                    tx.execute(
                        "UPDATE locks SET status = 'expired' WHERE id = ?1",
                        params![expired.id],
                    )?;
                }
                let id = uuid::Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO locks (id, path, owner_session, status, created_at, expires_at) \
                     VALUES (?1, ?2, ?3, 'active', ?4, ?5)",
                    params![id, path_text, owner, now, expires_at],
                )?;
                DirLock {
                    id,
                    path: path.to_path_buf(),
                    owner_session: owner.to_owned(),
                    status: LockState::Active,
                    created_at: now,
                    expires_at,
                }
            }
        };
        tx.commit()?;
        Ok(lock)
    }

    /// Extend a lease. Fails `Conflict` when `owner` does not hold the lock
    /// or the lease has already expired.
    pub fn renew_lock(&self, id: &str, owner: &str, ttl_secs: u64) -> Result<DirLock> {
        let now = epoch_ms();
        let lock = self.get_lock(id)?;
        if lock.owner_session != owner {
            return Err(Error::conflict(format!(
                "lock {id} is owned by {}, not {owner}",
                lock.owner_session
            )));
        }
        if lock.status != LockState::Active || lock.expires_at <= now {
            return Err(Error::conflict(format!("lock {id} has expired")));
        }
        let expires_at = now + ttl_secs.saturating_mul(1000);
        let conn = self.conn();
        conn.execute(
            "UPDATE locks SET expires_at = ?2 WHERE id = ?1 AND status = 'active'",
            params![id, expires_at],
        )?;
        Ok(DirLock { expires_at, ..lock })
    }

    /// Release a lease. Idempotent: releasing a released or unknown lock is Ok.
    pub fn release_lock(&self, id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE locks SET status = 'released' WHERE id = ?1 AND status = 'active'",
            params![id],
        )?;
        Ok(())
    }

    /// Release every active lease held by `owner`. Returns leases released.
    pub fn release_locks_owned_by(&self, owner: &str) -> Result<usize> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE locks SET status = 'released' \
             WHERE owner_session = ?1 AND status = 'active'",
            params![owner],
        )?;
        Ok(changed)
    }

    pub fn get_lock(&self, id: &str) -> Result<DirLock> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {LOCK_COLUMNS} FROM locks WHERE id = ?1"),
            params![id],
            row_to_lock,
        )
        .optional()?
        .ok_or_else(|| Error::not_found(format!("lock {id}")))
    }

    pub fn list_locks(&self, active_only: bool) -> Result<Vec<DirLock>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOCK_COLUMNS} FROM locks \
             WHERE (?1 = 0 OR status = 'active') ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![i64::from(active_only)], row_to_lock)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Forcibly expire active leases whose deadline has passed.
    pub fn expire_due_locks(&self, now: u64) -> Result<Vec<DirLock>> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let due: Vec<DirLock> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {LOCK_COLUMNS} FROM locks \
                 WHERE status = 'active' AND expires_at <= ?1"
            ))?;
            let rows = stmt.query_map(params![now], row_to_lock)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for lock in &due {
            tx.execute("UPDATE locks SET status = 'expired' WHERE id = ?1", params![lock.id])?;
        }
        tx.commit()?;
        Ok(due)
    }

    /// Expire active leases created before `cutoff_ms` (crash recovery).
    pub fn expire_locks_created_before(&self, cutoff_ms: u64, except_owner_busy: bool) -> Result<usize> {
        let conn = self.conn();
        let sql = if except_owner_busy {
            // Leave leases whose owner still runs an in-progress prompt; the
            // completion sweep settles those.
            "UPDATE locks SET status = 'expired' \
             WHERE status = 'active' AND created_at < ?1 \
               AND owner_session NOT IN ( \
                   SELECT assigned_session FROM prompts \
                   WHERE status = 'in_progress' AND assigned_session IS NOT NULL)"
        } else {
            "UPDATE locks SET status = 'expired' WHERE status = 'active' AND created_at < ?1"
        };
        let changed = conn.execute(sql, params![cutoff_ms])?;
        Ok(changed)
    }
}
