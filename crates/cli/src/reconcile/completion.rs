// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Completion sweep: settles every claimed session each tick.
//!
//! Three outcomes per prompt, in order of precedence: a cancellation intent
//! (interrupt, then wait for the pane to acknowledge), a provider sentinel in
//! the pane tail (success or failure), or the per-prompt timeout.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::run::Daemon;
use crate::store::{
    AssignmentAction, Prompt, PromptState, Session, SessionStatus, Transition,
};

/// Sweep state that lives across ticks: which prompts already received their
/// interrupt keystroke. Lost on restart, in which case the interrupt is sent
/// again; a second Ctrl-C into an already-interrupted pane is harmless.
pub struct Sweeper {
    interrupted: HashSet<i64>,
}

impl Sweeper {
    pub fn new() -> Self {
        Self { interrupted: HashSet::new() }
    }

    /// Run one sweep over all claimed sessions. Returns settled prompt count.
    pub async fn sweep_once(&mut self, daemon: &Daemon, now_ms: u64) -> crate::error::Result<usize> {
        let mut settled = 0;

        // Cancellation intents that raced a dispatch rollback back to pending.
        for id in daemon.store.pending_cancel_ids()? {
            let done = daemon.store.transition(
                id,
                &[PromptState::Pending],
                &Transition::to(PromptState::Cancelled),
            );
            if done.is_ok() {
                let _ = daemon.store.log_assignment(id, "", AssignmentAction::Cancelled, "");
                settled += 1;
            }
        }

        for session in daemon.registry.claimed().await {
            let Some(prompt_id) = session.current_task_id else { continue };
            let prompt = match daemon.store.get_prompt(prompt_id) {
                Ok(p) => p,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    // The prompt row is gone (cleanup raced); repair the claim.
                    warn!("session {} claims missing prompt {prompt_id}", session.name);
                    let _ = daemon.registry.clear_claim(&session.name, session.status).await;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if prompt.status.is_terminal()
                || prompt.assigned_session.as_deref() != Some(session.name.as_str())
            {
                let _ = daemon.registry.clear_claim(&session.name, session.status).await;
                self.interrupted.remove(&prompt_id);
                continue;
            }

            if self.settle(daemon, &session, &prompt, now_ms).await? {
                settled += 1;
            }
        }
        Ok(settled)
    }

    /// Inspect one claimed session; returns whether its prompt was settled.
    async fn settle(
        &mut self,
        daemon: &Daemon,
        session: &Session,
        prompt: &Prompt,
        now_ms: u64,
    ) -> crate::error::Result<bool> {
        let obs = daemon.probe.observe(&session.name, session.provider);

        if prompt.cancel_requested {
            if !self.interrupted.contains(&prompt.id) {
                match daemon.probe.interrupt(&session.name) {
                    Ok(()) => {
                        self.interrupted.insert(prompt.id);
                        debug!(prompt = prompt.id, session = %session.name, "interrupt sent");
                    }
                    Err(e) => debug!("interrupt of {} failed: {e}", session.name),
                }
                return Ok(false);
            }
            // Hold the lock until the pane acknowledges the interrupt; a new
            // lock on a still-writing session would not be safe.
            if obs.status == SessionStatus::Busy {
                return Ok(false);
            }
            self.finish(
                daemon,
                session,
                prompt,
                PromptState::Cancelled,
                AssignmentAction::Cancelled,
                &Transition::to(PromptState::Cancelled),
            )
            .await?;
            self.interrupted.remove(&prompt.id);
            return Ok(true);
        }

        let sentinel = daemon.sentinels.get(session.provider);
        if prompt.status == PromptState::InProgress {
            if let Some(line) = sentinel.match_failure(&obs.last_output) {
                self.finish(
                    daemon,
                    session,
                    prompt,
                    PromptState::Failed,
                    AssignmentAction::Failed,
                    &Transition::to(PromptState::Failed).with_error(line.trim()),
                )
                .await?;
                return Ok(true);
            }
            if sentinel.match_success(&obs.last_output).is_some() {
                let response = obs.last_output.trim_end().to_owned();
                self.finish(
                    daemon,
                    session,
                    prompt,
                    PromptState::Completed,
                    AssignmentAction::Completed,
                    &Transition::to(PromptState::Completed).with_response(response),
                )
                .await?;
                return Ok(true);
            }
        }

        if prompt.deadline().is_some_and(|deadline| now_ms > deadline) {
            self.finish(
                daemon,
                session,
                prompt,
                PromptState::Failed,
                AssignmentAction::TimedOut,
                &Transition::to(PromptState::Failed).with_error("timeout"),
            )
            .await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Apply a terminal transition, then release the session and its locks.
    async fn finish(
        &mut self,
        daemon: &Daemon,
        session: &Session,
        prompt: &Prompt,
        to: PromptState,
        action: AssignmentAction,
        transition: &Transition,
    ) -> crate::error::Result<()> {
        let from = [PromptState::Assigned, PromptState::InProgress];
        match daemon.store.transition(prompt.id, &from, transition) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Conflict => {
                // Lost to the dispatcher or another loop; re-read next tick.
                debug!("sweep lost transition race on prompt {}: {e}", prompt.id);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        let _ = daemon.store.log_assignment(prompt.id, &session.name, action, "");
        let _ = daemon.locks.release_owned_by(&session.name);
        let next = match to {
            PromptState::Cancelled => SessionStatus::Unknown,
            _ => SessionStatus::Idle,
        };
        daemon.registry.clear_claim(&session.name, next).await?;
        info!(prompt = prompt.id, session = %session.name, state = %to, "prompt settled");
        Ok(())
    }
}

impl Default for Sweeper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "completion_tests.rs"]
mod tests;
