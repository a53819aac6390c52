// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::store::{epoch_ms, NewPrompt, PromptState, Transition};
use crate::test_support::test_daemon;

use super::drive;

const FAR_FUTURE_MS: u64 = 60 * 60 * 1000;

fn fail(daemon: &crate::run::Daemon, id: i64) -> crate::error::Result<()> {
    daemon.store.transition(
        id,
        &[PromptState::Pending],
        &Transition::to(PromptState::Failed).with_error("boom"),
    )
}

#[tokio::test]
async fn requeues_after_backoff() -> anyhow::Result<()> {
    let (daemon, _) = test_daemon()?;
    let id = daemon.queue.submit(&NewPrompt::new("x"))?;
    fail(&daemon, id)?;

    assert_eq!(drive(&daemon, epoch_ms() + FAR_FUTURE_MS)?, 1);
    let prompt = daemon.store.get_prompt(id)?;
    assert_eq!(prompt.status, PromptState::Pending);
    assert_eq!(prompt.retry_count, 1);
    Ok(())
}

#[tokio::test]
async fn waits_out_the_backoff_window() -> anyhow::Result<()> {
    let (daemon, _) = test_daemon()?;
    let id = daemon.queue.submit(&NewPrompt::new("x"))?;
    fail(&daemon, id)?;

    let failed_at = daemon
        .store
        .get_prompt(id)?
        .completed_at
        .ok_or_else(|| anyhow::anyhow!("no failure time"))?;
    // At the moment of failure the minimum jittered delay has not elapsed.
    assert_eq!(drive(&daemon, failed_at)?, 0);
    assert_eq!(daemon.store.get_prompt(id)?.status, PromptState::Failed);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_stay_failed() -> anyhow::Result<()> {
    let (daemon, _) = test_daemon()?;
    let mut new = NewPrompt::new("x");
    new.max_retries = 0;
    let id = daemon.queue.submit(&new)?;
    fail(&daemon, id)?;

    assert_eq!(drive(&daemon, epoch_ms() + FAR_FUTURE_MS)?, 0);
    assert_eq!(daemon.store.get_prompt(id)?.status, PromptState::Failed);
    Ok(())
}

#[tokio::test]
async fn each_retry_consumes_one_attempt() -> anyhow::Result<()> {
    let (daemon, _) = test_daemon()?;
    let mut new = NewPrompt::new("x");
    new.max_retries = 2;
    let id = daemon.queue.submit(&new)?;

    for expected in 1..=2u32 {
        fail(&daemon, id)?;
        assert_eq!(drive(&daemon, epoch_ms() + FAR_FUTURE_MS)?, 1);
        assert_eq!(daemon.store.get_prompt(id)?.retry_count, expected);
    }
    // Third failure is terminal.
    fail(&daemon, id)?;
    assert_eq!(drive(&daemon, epoch_ms() + FAR_FUTURE_MS)?, 0);
    assert_eq!(daemon.store.get_prompt(id)?.status, PromptState::Failed);
    Ok(())
}
