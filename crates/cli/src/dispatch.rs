// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatcher: realizes one matched `(prompt, session)` pair.
//!
//! Every step is conditional on the store, so any failure rolls the prompt
//! back to `pending` and the next tick re-matches it. Concurrent dispatchers
//! racing for the same prompt or session resolve through `Conflict` losses,
//! never through shared in-memory state.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::locks::LockManager;
use crate::matcher::{self, Match, MatchTick};
use crate::run::Daemon;
use crate::store::{
    epoch_ms, AssignmentAction, Prompt, PromptState, SessionStatus, Transition,
};

/// Matching cadence between dispatches.
pub const DISPATCH_TICK_MS: u64 = 500;

/// Extra lease time beyond the prompt's timeout before a lock expires.
const LOCK_GRACE_SECS: u64 = 300;

/// Long-running matching loop: one `select` per tick, executions fanned out
/// to a pool bounded by the dispatch semaphore.
///
/// Workers live in a `JoinSet` so shutdown drains in-flight dispatches
/// instead of aborting them between a lock acquire and its release.
pub async fn run_loop(daemon: Arc<Daemon>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(DISPATCH_TICK_MS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut workers: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            _ = daemon.shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        // Reap finished workers so the set stays small.
        while workers.try_join_next().is_some() {}
        // Keep matching until the backlog yields nothing for this tick.
        loop {
            match tick_once(&daemon, &mut workers).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) if e.kind() == ErrorKind::StorageUnavailable => {
                    warn!("dispatch paused, store unavailable: {e}");
                    break;
                }
                Err(e) => {
                    debug!("dispatch tick error: {e}");
                    break;
                }
            }
        }
    }
    while workers.join_next().await.is_some() {}
    debug!("dispatch loop stopped");
}

/// Select the best pair and claim its prompt (`pending → assigned`), so the
/// next tick cannot select it again. `None` when nothing matches, or when the
/// claim was lost to a concurrent worker.
async fn select_and_claim(daemon: &Daemon) -> Result<Option<Match>> {
    let prompts = daemon.store.list_pending(daemon.config.scan_limit)?;
    if prompts.is_empty() {
        return Ok(None);
    }
    let sessions = daemon.registry.snapshot().await;
    let holders = daemon.locks.holders(epoch_ms())?;
    let tick = MatchTick {
        prompts: &prompts,
        sessions: &sessions,
        lock_holders: &holders,
        now_ms: epoch_ms(),
        warm_ms: daemon.config.warm_threshold_ms(),
    };
    let Some(matched) = matcher::select(&tick) else {
        return Ok(None);
    };

    let claim = daemon.store.transition(
        matched.prompt_id,
        &[PromptState::Pending],
        &Transition::to(PromptState::Assigned).with_session(&matched.session),
    );
    match claim {
        Ok(()) => {
            let _ = daemon.store.log_assignment(
                matched.prompt_id,
                &matched.session,
                AssignmentAction::Assigned,
                "",
            );
            Ok(Some(matched))
        }
        Err(e) if e.kind() == ErrorKind::Conflict => Ok(None),
        Err(e) => Err(e),
    }
}

/// Run one matching tick. Returns `true` when a pair was selected and handed
/// to a dispatcher worker in `workers`.
pub async fn tick_once(daemon: &Arc<Daemon>, workers: &mut JoinSet<()>) -> Result<bool> {
    let Some(matched) = select_and_claim(daemon).await? else {
        return Ok(false);
    };
    let permit = Arc::clone(&daemon.dispatch_permits)
        .acquire_owned()
        .await
        .map_err(|_| Error::storage("dispatcher pool closed"))?;
    let daemon = Arc::clone(daemon);
    workers.spawn(async move {
        let _permit = permit;
        execute(&daemon, &matched).await;
    });
    Ok(true)
}

/// Match and execute one pair inline (no worker pool). Used by tests and by
/// anything that wants a synchronous dispatch attempt.
pub async fn run_once(daemon: &Arc<Daemon>) -> Result<bool> {
    let Some(matched) = select_and_claim(daemon).await? else {
        return Ok(false);
    };
    execute(daemon, &matched).await;
    Ok(true)
}

/// Execute a pair whose prompt is already in `assigned`.
pub async fn execute(daemon: &Daemon, matched: &Match) {
    let prompt = match daemon.store.get_prompt(matched.prompt_id) {
        Ok(p) => p,
        Err(e) => {
            warn!("dispatch lost prompt {}: {e}", matched.prompt_id);
            return;
        }
    };
    let session = &matched.session;

    let mut lock_ids: Vec<String> = Vec::new();
    let mut claimed = false;
    let outcome = deliver(daemon, &prompt, session, &mut lock_ids, &mut claimed).await;

    match outcome {
        Ok(()) => {
            info!(prompt = prompt.id, session = %session, "prompt dispatched");
        }
        Err(e) => {
            for id in &lock_ids {
                let _ = daemon.locks.release(id);
            }
            if claimed {
                let _ = daemon.registry.clear_claim(session, SessionStatus::Idle).await;
            }
            let bump = e.kind() == ErrorKind::ContextMismatch;
            let mut t = Transition::to(PromptState::Pending).with_error(e.to_string());
            if bump {
                t = t.bump_retry();
            }
            let rolled = daemon.store.transition(
                prompt.id,
                &[PromptState::Assigned, PromptState::InProgress],
                &t,
            );
            if let Err(roll_err) = rolled {
                // Someone else moved the prompt first (e.g. a cancel sweep);
                // re-read and leave it alone.
                debug!("dispatch rollback of prompt {} skipped: {roll_err}", prompt.id);
            }
            let reason = requeue_reason(&e);
            let _ =
                daemon.store.log_assignment(prompt.id, session, AssignmentAction::Requeued, reason);
            debug!(prompt = prompt.id, session = %session, "dispatch requeued: {e}");
        }
    }
}

/// Steps 2–6: locks, preparation, validation, claim, injection.
async fn deliver(
    daemon: &Daemon,
    prompt: &Prompt,
    session: &str,
    lock_ids: &mut Vec<String>,
    claimed: &mut bool,
) -> Result<()> {
    let entry = daemon.registry.get(session).await?;

    // 2. Directory lock, leased past the prompt's own deadline.
    let required_dir = prompt.metadata.working_dir.as_deref().map(LockManager::canonicalize);
    if let Some(ref dir) = required_dir {
        let ttl = u64::from(prompt.timeout_minutes) * 60 + LOCK_GRACE_SECS;
        let lock = daemon.locks.acquire(dir, session, Some(ttl))?;
        lock_ids.push(lock.id);
    }

    // 3. Preparation keystrokes: directory, environment, prerequisites.
    let obs = daemon.probe.observe(session, entry.provider);
    if !obs.exists {
        return Err(Error::not_found(format!("pane {session}")));
    }
    if let Some(ref dir) = required_dir {
        let current = obs
            .working_dir
            .as_deref()
            .or(entry.working_dir.as_deref())
            .map(LockManager::canonicalize);
        if current.as_ref() != Some(dir) {
            daemon.probe.inject(session, &format!("cd '{}'", dir.display()), true)?;
        }
    }
    for (key, value) in &prompt.metadata.env_vars {
        daemon.probe.inject(session, &format!("export {key}='{value}'"), true)?;
    }
    for prerequisite in &prompt.metadata.prerequisites {
        daemon.probe.inject(session, prerequisite, true)?;
    }

    // 4. Validate the context before delivering anything to the agent.
    if required_dir.is_some() || prompt.metadata.git_branch.is_some() {
        let Some((cwd, branch)) = daemon.probe.refresh_context(session).await else {
            return Err(Error::new(
                ErrorKind::ContextMismatch,
                format!("session {session} did not report its context"),
            ));
        };
        if let Some(ref dir) = required_dir {
            let cwd = LockManager::canonicalize(&cwd);
            if &cwd != dir {
                return Err(Error::new(
                    ErrorKind::ContextMismatch,
                    format!("session {session} is in {} instead of {}", cwd.display(), dir.display()),
                ));
            }
        }
        if let Some(ref required_branch) = prompt.metadata.git_branch {
            if branch.as_deref() != Some(required_branch.as_str()) {
                return Err(Error::new(
                    ErrorKind::ContextMismatch,
                    format!(
                        "session {session} is on branch {} instead of {required_branch}",
                        branch.as_deref().unwrap_or("<none>")
                    ),
                ));
            }
        }
    }

    // 5. Claim the session.
    daemon.registry.set_claim(session, prompt.id).await?;
    *claimed = true;
    daemon.store.merge_session_env(session, &prompt.metadata.env_vars)?;

    // 6. Hand over the prompt. The log row rides with the transition so the
    // assignment history never trails the state a restart can observe.
    daemon.store.transition(
        prompt.id,
        &[PromptState::Assigned],
        &Transition::to(PromptState::InProgress),
    )?;
    let _ = daemon.store.log_assignment(prompt.id, session, AssignmentAction::Started, "");
    daemon.probe.inject(session, &prompt.content, true)?;
    Ok(())
}

fn requeue_reason(e: &Error) -> &'static str {
    match e.kind() {
        ErrorKind::Busy => "lock_busy",
        ErrorKind::ContextMismatch => "context_mismatch",
        ErrorKind::Conflict => "claim_conflict",
        ErrorKind::NotFound => "pane_gone",
        _ => "dispatch_error",
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
