// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Directory lock manager: mutual exclusion over filesystem paths so at most
//! one session writes to a repository at a time.
//!
//! Paths are canonicalized before comparison. Nested paths are distinct;
//! there is no hierarchical locking, so producers target the repository root.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::store::{DirLock, Store};

pub struct LockManager {
    store: Arc<Store>,
    default_ttl_secs: u64,
}

impl LockManager {
    pub fn new(store: Arc<Store>, default_ttl_secs: u64) -> Self {
        Self { store, default_ttl_secs }
    }

    /// Resolve a path to its canonical absolute form. A path that does not
    /// exist (yet) is used as given.
    pub fn canonicalize(path: &Path) -> PathBuf {
        std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    /// Acquire an exclusive lease on `path` for `owner`; `Busy` when another
    /// owner holds an unexpired lease.
    pub fn acquire(&self, path: &Path, owner: &str, ttl_secs: Option<u64>) -> Result<DirLock> {
        let canonical = Self::canonicalize(path);
        self.store.acquire_lock(&canonical, owner, ttl_secs.unwrap_or(self.default_ttl_secs))
    }

    pub fn renew(&self, id: &str, owner: &str, ttl_secs: Option<u64>) -> Result<DirLock> {
        self.store.renew_lock(id, owner, ttl_secs.unwrap_or(self.default_ttl_secs))
    }

    /// Idempotent release.
    pub fn release(&self, id: &str) -> Result<()> {
        self.store.release_lock(id)
    }

    /// Release every lease held by `owner` (terminal prompt, stuck session).
    pub fn release_owned_by(&self, owner: &str) -> Result<usize> {
        self.store.release_locks_owned_by(owner)
    }

    pub fn list(&self, active_only: bool) -> Result<Vec<DirLock>> {
        self.store.list_locks(active_only)
    }

    /// Forcibly expire leases whose deadline passed. Returns the expired set.
    pub fn reap_expired(&self, now_ms: u64) -> Result<Vec<DirLock>> {
        self.store.expire_due_locks(now_ms)
    }

    /// Current holders keyed by canonical path, for the matching engine.
    pub fn holders(&self, now_ms: u64) -> Result<HashMap<PathBuf, String>> {
        let mut holders = HashMap::new();
        for lock in self.store.list_locks(true)? {
            if lock.expires_at > now_ms {
                holders.insert(lock.path.clone(), lock.owner_session.clone());
            }
        }
        Ok(holders)
    }
}

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;
