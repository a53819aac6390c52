// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The prompt queue: an ordered, priority-aware view over the store.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};
use crate::sentinel::Provider;
use crate::store::{
    AssignmentAction, NewPrompt, Prompt, PromptState, QueueStats, Store, Transition,
};

/// What `cancel` did, which depends on how far the prompt had progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The prompt was still pending and is now terminally cancelled.
    Cancelled,
    /// The prompt is with a session; the completion sweep will interrupt it.
    CancelRequested,
}

pub struct Queue {
    store: Arc<Store>,
    retry_base_secs: u64,
}

impl Queue {
    pub fn new(store: Arc<Store>, retry_base_secs: u64) -> Self {
        Self { store, retry_base_secs }
    }

    /// Accept a submission, returning the new prompt id.
    pub fn submit(&self, new: &NewPrompt) -> Result<i64> {
        self.store.enqueue(new)
    }

    pub fn get(&self, id: i64) -> Result<Prompt> {
        self.store.get_prompt(id)
    }

    /// Cancel a prompt. Pending prompts terminate immediately; prompts held
    /// by a session get a cancellation intent picked up by the sweep.
    pub fn cancel(&self, id: i64) -> Result<CancelOutcome> {
        let direct = self.store.transition(
            id,
            &[PromptState::Pending],
            &Transition::to(PromptState::Cancelled),
        );
        match direct {
            Ok(()) => {
                self.store.log_assignment(id, "", AssignmentAction::Cancelled, "cancelled while pending")?;
                Ok(CancelOutcome::Cancelled)
            }
            Err(e) if e.kind() == crate::error::ErrorKind::Conflict => {
                self.store.set_cancel_requested(id)?;
                Ok(CancelOutcome::CancelRequested)
            }
            Err(e) => Err(e),
        }
    }

    /// Operator-initiated retry of a failed prompt. A no-op with an error on
    /// any other state; counts against `max_retries` like an automatic retry.
    pub fn retry(&self, id: i64) -> Result<()> {
        let prompt = self.store.get_prompt(id)?;
        if prompt.status != PromptState::Failed {
            return Err(Error::conflict(format!(
                "prompt {id} is {}, only failed prompts can be retried",
                prompt.status
            )));
        }
        if prompt.retry_count >= prompt.max_retries {
            return Err(Error::conflict(format!(
                "prompt {id} exhausted its {} retries",
                prompt.max_retries
            )));
        }
        self.requeue(id, "operator retry")
    }

    /// `failed → pending` with `retry_count += 1`.
    pub fn requeue(&self, id: i64, reason: &str) -> Result<()> {
        self.store.transition(
            id,
            &[PromptState::Failed],
            &Transition::to(PromptState::Pending).bump_retry(),
        )?;
        self.store.log_assignment(id, "", AssignmentAction::Retried, reason)?;
        Ok(())
    }

    /// Backlog head in dispatch order.
    pub fn peek(&self, limit: usize) -> Result<Vec<Prompt>> {
        self.store.list_pending(limit)
    }

    pub fn stats(&self) -> Result<QueueStats> {
        self.store.stats()
    }

    /// Atomically claim the best pending prompt for a session.
    pub fn claim(&self, session: &str, provider: Provider) -> Result<Option<Prompt>> {
        self.store.claim_next(session, provider)
    }

    /// Retry delay for the next attempt: `base · 2^retry_count` with ±50%
    /// jitter, capped at the prompt's own timeout.
    pub fn backoff(&self, retry_count: u32, timeout_minutes: u32) -> Duration {
        let cap = u64::from(timeout_minutes) * 60;
        let exp = self.retry_base_secs.saturating_mul(1u64 << retry_count.min(20));
        let base = exp.min(cap).max(1);
        let jitter = rand::rng().random_range(0.5..1.5);
        Duration::from_secs_f64((base as f64 * jitter).min(cap as f64).max(1.0))
    }

    /// Whether a failed prompt's backoff deadline has elapsed at `now_ms`.
    pub fn retry_due(&self, prompt: &Prompt, now_ms: u64) -> bool {
        let failed_at = prompt.completed_at.unwrap_or(prompt.created_at);
        let delay = self.backoff(prompt.retry_count, prompt.timeout_minutes);
        now_ms >= failed_at + delay.as_millis() as u64
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
