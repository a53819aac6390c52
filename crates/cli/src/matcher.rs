// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Matching engine: picks one `(prompt, session)` pair per tick.
//!
//! Prompts are scanned in dispatch order, so an older high-priority prompt is
//! reconsidered every tick and cannot be starved by newer arrivals. The first
//! prompt with any eligible session wins; among its eligible sessions the
//! highest-scoring one is chosen.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::locks::LockManager;
use crate::store::{Prompt, Session, SessionStatus};

/// Inputs for one matching tick.
pub struct MatchTick<'a> {
    /// Pending prompts in `(priority DESC, created_at ASC, id ASC)` order,
    /// already capped at the scan limit.
    pub prompts: &'a [Prompt],
    pub sessions: &'a [Session],
    /// Active unexpired lock holders keyed by canonical path.
    pub lock_holders: &'a HashMap<PathBuf, String>,
    pub now_ms: u64,
    /// Idle age below which a session still counts as context-warm.
    pub warm_ms: u64,
}

/// A selected pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub prompt_id: i64,
    pub session: String,
}

/// Choose the next pair, or `None` when nothing can be dispatched this tick.
pub fn select(tick: &MatchTick<'_>) -> Option<Match> {
    for prompt in tick.prompts {
        let eligible: Vec<(&Session, i64)> = match prompt.target_session.as_deref() {
            Some(pinned) => tick
                .sessions
                .iter()
                .filter(|s| s.name == pinned)
                .filter_map(|s| score(prompt, s, tick).map(|sc| (s, sc)))
                .collect(),
            None => tick
                .sessions
                .iter()
                .filter(|s| {
                    prompt.target_provider.is_none_or(|p| p == s.provider)
                })
                .filter_map(|s| score(prompt, s, tick).map(|sc| (s, sc)))
                .collect(),
        };

        let best = eligible.into_iter().max_by(|(a, sa), (b, sb)| {
            sa.cmp(sb)
                // On score ties prefer the least-recently active session,
                // then the lexically smallest name, deterministically.
                .then(b.last_activity.cmp(&a.last_activity))
                .then(b.name.cmp(&a.name))
        });
        if let Some((session, _)) = best {
            return Some(Match { prompt_id: prompt.id, session: session.name.clone() });
        }
    }
    None
}

/// Score one session for one prompt; `None` means ineligible.
fn score(prompt: &Prompt, session: &Session, tick: &MatchTick<'_>) -> Option<i64> {
    if session.status != SessionStatus::Idle || session.current_task_id.is_some() {
        return None;
    }

    let required_dir = prompt.metadata.working_dir.as_deref().map(LockManager::canonicalize);
    if let Some(ref dir) = required_dir {
        if let Some(holder) = tick.lock_holders.get(dir) {
            if holder != &session.name {
                return None;
            }
        }
    }

    let mut score = 0;
    if let Some(ref dir) = required_dir {
        let session_dir = session.working_dir.as_deref().map(LockManager::canonicalize);
        if session_dir.as_ref() == Some(dir) {
            score += 10;
        }
    }
    if !prompt.metadata.env_vars.is_empty()
        && prompt
            .metadata
            .env_vars
            .iter()
            .all(|(k, v)| session.env_vars.get(k).is_some_and(|sv| sv == v))
    {
        score += 5;
    }
    if tick.now_ms.saturating_sub(session.last_activity) < tick.warm_ms {
        score += 3;
    }
    if let Some(ref branch) = prompt.metadata.git_branch {
        if session.git_branch.as_deref() == Some(branch.as_str()) {
            score += 1;
        }
    }
    Some(score)
}

#[cfg(test)]
#[path = "matcher_tests.rs"]
mod tests;
