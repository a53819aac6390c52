// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::dispatch;
use crate::sentinel::Provider;
use crate::store::{epoch_ms, AssignmentAction, NewPrompt, PromptState, SessionStatus};
use crate::test_support::{register_idle, test_daemon};

use super::detect;

#[tokio::test]
async fn silent_busy_session_is_stuck() -> anyhow::Result<()> {
    let (daemon, panes) = test_daemon()?;
    register_idle(&daemon, &panes, "x", Provider::Claude, "/repo/a", None).await?;
    let mut new = NewPrompt::new("work");
    new.metadata.working_dir = Some("/repo/a".into());
    new.timeout_minutes = 30;
    let id = daemon.queue.submit(&new)?;
    anyhow::ensure!(dispatch::run_once(&daemon).await?, "dispatch did not run");

    // Within the window the session is left alone.
    assert_eq!(detect(&daemon, epoch_ms()).await?, 0);

    // Past timeout_minutes with no output change, the prompt is force-failed.
    let past = epoch_ms() + 31 * 60 * 1000;
    assert_eq!(detect(&daemon, past).await?, 1);

    let prompt = daemon.store.get_prompt(id)?;
    assert_eq!(prompt.status, PromptState::Failed);
    assert_eq!(prompt.error.as_deref(), Some("stuck"));

    let session = daemon.registry.get("x").await?;
    assert_eq!(session.status, SessionStatus::Unknown);
    assert_eq!(session.current_task_id, None);
    assert!(daemon.locks.list(true)?.is_empty());

    let history = daemon.store.assignment_history(Some(id), None, 10)?;
    assert!(history.iter().any(|r| r.action == AssignmentAction::Failed && r.details == "stuck"));
    Ok(())
}

#[tokio::test]
async fn idle_sessions_are_ignored() -> anyhow::Result<()> {
    let (daemon, panes) = test_daemon()?;
    register_idle(&daemon, &panes, "x", Provider::Claude, "/repo/a", None).await?;
    assert_eq!(detect(&daemon, epoch_ms() + 60 * 60 * 1000).await?, 0);
    Ok(())
}

#[tokio::test]
async fn retry_driver_requeues_a_stuck_failure() -> anyhow::Result<()> {
    let (daemon, panes) = test_daemon()?;
    register_idle(&daemon, &panes, "x", Provider::Claude, "/repo/a", None).await?;
    let id = daemon.queue.submit(&NewPrompt::new("work"))?;
    anyhow::ensure!(dispatch::run_once(&daemon).await?, "dispatch did not run");

    let past = epoch_ms() + 31 * 60 * 1000;
    assert_eq!(detect(&daemon, past).await?, 1);
    // The stuck failure is retryable like any other failure.
    assert_eq!(super::super::retry::drive(&daemon, past + 60 * 60 * 1000)?, 1);
    let prompt = daemon.store.get_prompt(id)?;
    assert_eq!(prompt.status, PromptState::Pending);
    assert_eq!(prompt.retry_count, 1);
    Ok(())
}
