// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry: the authoritative in-process view of known sessions.
//!
//! The registry owns all session mutation; other components go through its
//! operations and never share the map directly. The cache is written through
//! to the store and is reconstructable from it on restart.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::probe::Observation;
use crate::sentinel::Provider;
use crate::store::{Session, SessionStatus, Store};

pub struct Registry {
    store: Arc<Store>,
    cache: RwLock<HashMap<String, Session>>,
}

impl Registry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store, cache: RwLock::new(HashMap::new()) }
    }

    /// Rebuild the cache from the store (startup).
    pub async fn load(&self) -> Result<()> {
        let sessions = self.store.list_sessions(None)?;
        let mut cache = self.cache.write().await;
        cache.clear();
        for session in sessions {
            cache.insert(session.name.clone(), session);
        }
        Ok(())
    }

    /// Register a session, or refresh its provider tag if already known.
    pub async fn register(&self, name: &str, provider: Provider) -> Result<Session> {
        self.store.upsert_session(name, provider)?;
        let session = self.store.get_session(name)?;
        self.cache.write().await.insert(name.to_owned(), session.clone());
        Ok(session)
    }

    /// Remove a session. Refuses while it holds a non-terminal prompt.
    pub async fn deregister(&self, name: &str) -> Result<()> {
        self.store.delete_session(name)?;
        self.cache.write().await.remove(name);
        Ok(())
    }

    /// Apply one probe observation to the store and cache.
    pub async fn update_from_observation(&self, name: &str, obs: &Observation) -> Result<()> {
        let activity_at = Some(obs.changed_at);
        self.store.update_session_observation(
            name,
            obs.status,
            obs.working_dir.as_deref(),
            obs.git_branch.as_deref(),
            &obs.last_output,
            activity_at,
        )?;
        let session = self.store.get_session(name)?;
        self.cache.write().await.insert(name.to_owned(), session);
        Ok(())
    }

    /// Mark a session busy with `prompt_id` as its single claim.
    pub async fn set_claim(&self, name: &str, prompt_id: i64) -> Result<()> {
        let current = self.get(name).await?;
        if let Some(held) = current.current_task_id {
            if held != prompt_id {
                return Err(Error::conflict(format!(
                    "session {name} already holds prompt {held}"
                )));
            }
        }
        self.store.set_session_status(name, SessionStatus::Busy, Some(prompt_id))?;
        self.refresh(name).await
    }

    /// Clear a session's claim, leaving its status as `status`.
    pub async fn clear_claim(&self, name: &str, status: SessionStatus) -> Result<()> {
        self.store.set_session_status(name, status, None)?;
        self.refresh(name).await
    }

    pub async fn get(&self, name: &str) -> Result<Session> {
        if let Some(session) = self.cache.read().await.get(name) {
            return Ok(session.clone());
        }
        // Cache miss: fall through to the store (another process or a fresh
        // registration may have written it).
        let session = self.store.get_session(name)?;
        self.cache.write().await.insert(name.to_owned(), session.clone());
        Ok(session)
    }

    /// All known sessions, sorted by name.
    pub async fn snapshot(&self) -> Vec<Session> {
        let cache = self.cache.read().await;
        let mut sessions: Vec<Session> = cache.values().cloned().collect();
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        sessions
    }

    /// Sessions with a claim set: the completion sweep's work list.
    pub async fn claimed(&self) -> Vec<Session> {
        self.snapshot().await.into_iter().filter(|s| s.current_task_id.is_some()).collect()
    }

    async fn refresh(&self, name: &str) -> Result<()> {
        let session = self.store.get_session(name)?;
        self.cache.write().await.insert(name.to_owned(), session);
        Ok(())
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
