// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stuck-session detector: a session busy past its prompt's deadline with no
//! observed output change gets its prompt force-failed and is degraded to
//! `unknown` until the next probe observation re-derives its real state.

use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::run::Daemon;
use crate::store::{AssignmentAction, PromptState, SessionStatus, Transition};

/// One detection pass. Returns the number of prompts force-failed.
pub async fn detect(daemon: &Daemon, now_ms: u64) -> crate::error::Result<usize> {
    let mut failed = 0;
    for session in daemon.registry.claimed().await {
        if session.status != SessionStatus::Busy {
            continue;
        }
        let Some(prompt_id) = session.current_task_id else { continue };
        let prompt = match daemon.store.get_prompt(prompt_id) {
            Ok(p) => p,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if prompt.status.is_terminal() {
            continue;
        }
        let silent_ms = now_ms.saturating_sub(session.last_activity);
        let limit_ms = u64::from(prompt.timeout_minutes) * 60_000;
        if silent_ms <= limit_ms {
            continue;
        }

        warn!(
            prompt = prompt_id,
            session = %session.name,
            silent_secs = silent_ms / 1000,
            "session stuck, failing its prompt"
        );
        let result = daemon.store.transition(
            prompt_id,
            &[PromptState::Assigned, PromptState::InProgress],
            &Transition::to(PromptState::Failed).with_error("stuck"),
        );
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Conflict => {
                debug!("stuck detector lost race on prompt {prompt_id}: {e}");
                continue;
            }
            Err(e) => return Err(e),
        }
        let _ = daemon.store.log_assignment(prompt_id, &session.name, AssignmentAction::Failed, "stuck");
        let _ = daemon.locks.release_owned_by(&session.name);
        daemon.registry.clear_claim(&session.name, SessionStatus::Unknown).await?;
        failed += 1;
    }
    Ok(failed)
}

#[cfg(test)]
#[path = "stuck_tests.rs"]
mod tests;
