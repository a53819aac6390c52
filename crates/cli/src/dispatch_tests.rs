// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::error::ErrorKind;
use crate::sentinel::Provider;
use crate::store::{
    AssignmentAction, LockState, NewPrompt, PromptState, SessionStatus,
};
use crate::test_support::{register_idle, test_daemon};

use super::run_once;

#[tokio::test]
async fn happy_path_dispatch() -> anyhow::Result<()> {
    let (daemon, panes) = test_daemon()?;
    register_idle(&daemon, &panes, "claude_1", Provider::Claude, "/repo/a", Some("main")).await?;

    let mut new = NewPrompt::new("hi");
    new.target_provider = Some(Provider::Claude);
    new.metadata.working_dir = Some("/repo/a".into());
    let id = daemon.queue.submit(&new)?;

    assert!(run_once(&daemon).await?);

    let prompt = daemon.store.get_prompt(id)?;
    assert_eq!(prompt.status, PromptState::InProgress);
    assert_eq!(prompt.assigned_session.as_deref(), Some("claude_1"));

    let session = daemon.registry.get("claude_1").await?;
    assert_eq!(session.status, SessionStatus::Busy);
    assert_eq!(session.current_task_id, Some(id));

    let locks = daemon.locks.list(true)?;
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].owner_session, "claude_1");
    assert_eq!(locks[0].status, LockState::Active);

    // The prompt content was the last committed keystroke batch.
    let sent = panes.sent("claude_1");
    let last = sent.last().ok_or_else(|| anyhow::anyhow!("nothing sent"))?;
    assert_eq!(last.text, "hi");
    assert!(last.commit);

    let history = daemon.store.assignment_history(Some(id), None, 10)?;
    let actions: Vec<AssignmentAction> = history.iter().rev().map(|r| r.action).collect();
    assert_eq!(actions, vec![AssignmentAction::Assigned, AssignmentAction::Started]);
    Ok(())
}

#[tokio::test]
async fn context_mismatch_requeues_with_bump() -> anyhow::Result<()> {
    let (daemon, panes) = test_daemon()?;
    register_idle(&daemon, &panes, "s1", Provider::Claude, "/repo/b", None).await?;
    // The shell stops honoring cd, so the session stays in /repo/b.
    panes.break_cd("s1");

    let mut new = NewPrompt::new("hi");
    new.metadata.working_dir = Some("/repo/a".into());
    let id = daemon.queue.submit(&new)?;

    assert!(run_once(&daemon).await?);

    let prompt = daemon.store.get_prompt(id)?;
    assert_eq!(prompt.status, PromptState::Pending);
    assert_eq!(prompt.retry_count, 1);
    assert!(prompt.error.as_deref().is_some_and(|e| e.contains("CONTEXT_MISMATCH")));

    // The lock was released and the session never got the prompt.
    assert!(daemon.locks.list(true)?.is_empty());
    let session = daemon.registry.get("s1").await?;
    assert_eq!(session.current_task_id, None);
    let sent = panes.sent("s1");
    assert!(sent.iter().all(|k| k.text != "hi"));

    let history = daemon.store.assignment_history(Some(id), None, 10)?;
    assert!(history
        .iter()
        .any(|r| r.action == AssignmentAction::Requeued && r.details == "context_mismatch"));
    Ok(())
}

#[tokio::test]
async fn foreign_lock_keeps_prompt_pending() -> anyhow::Result<()> {
    let (daemon, panes) = test_daemon()?;
    register_idle(&daemon, &panes, "s1", Provider::Claude, "/repo/x", None).await?;
    daemon.locks.acquire(std::path::Path::new("/repo/x"), "other", None)?;

    let mut new = NewPrompt::new("hi");
    new.metadata.working_dir = Some("/repo/x".into());
    let id = daemon.queue.submit(&new)?;

    // The matcher refuses the pair outright; no retry is consumed.
    assert!(!run_once(&daemon).await?);
    let prompt = daemon.store.get_prompt(id)?;
    assert_eq!(prompt.status, PromptState::Pending);
    assert_eq!(prompt.retry_count, 0);
    Ok(())
}

#[tokio::test]
async fn vanished_pane_rolls_back_without_bump() -> anyhow::Result<()> {
    let (daemon, panes) = test_daemon()?;
    register_idle(&daemon, &panes, "s1", Provider::Claude, "/repo/a", None).await?;
    panes.remove("s1");

    let id = daemon.queue.submit(&NewPrompt::new("hi"))?;
    assert!(run_once(&daemon).await?);

    let prompt = daemon.store.get_prompt(id)?;
    assert_eq!(prompt.status, PromptState::Pending);
    assert_eq!(prompt.retry_count, 0);
    Ok(())
}

#[tokio::test]
async fn priority_order_is_respected() -> anyhow::Result<()> {
    let (daemon, panes) = test_daemon()?;
    register_idle(&daemon, &panes, "s1", Provider::Claude, "/repo/a", None).await?;

    let first = daemon.queue.submit(&NewPrompt::new("first"))?;
    let mut urgent = NewPrompt::new("urgent");
    urgent.priority = 5;
    let second = daemon.queue.submit(&urgent)?;
    let third = daemon.queue.submit(&NewPrompt::new("third"))?;

    let mut order = Vec::new();
    for _ in 0..3 {
        assert!(run_once(&daemon).await?);
        let session = daemon.registry.get("s1").await?;
        let id = session.current_task_id.ok_or_else(|| anyhow::anyhow!("no claim"))?;
        order.push(id);
        // Settle the prompt so the session frees up for the next one.
        daemon.store.transition(
            id,
            &[crate::store::PromptState::InProgress],
            &crate::store::Transition::to(PromptState::Completed),
        )?;
        daemon.registry.clear_claim("s1", SessionStatus::Idle).await?;
    }
    assert_eq!(order, vec![second, first, third]);
    Ok(())
}

#[tokio::test]
async fn env_exports_are_recorded_on_session() -> anyhow::Result<()> {
    let (daemon, panes) = test_daemon()?;
    register_idle(&daemon, &panes, "s1", Provider::Claude, "/repo/a", None).await?;

    let mut new = NewPrompt::new("hi");
    new.metadata.env_vars.insert("CI".into(), "1".into());
    daemon.queue.submit(&new)?;
    assert!(run_once(&daemon).await?);

    let session = daemon.registry.get("s1").await?;
    assert_eq!(session.env_vars.get("CI").map(String::as_str), Some("1"));
    let sent = panes.sent("s1");
    assert!(sent.iter().any(|k| k.text == "export CI='1'"));
    Ok(())
}

#[tokio::test]
async fn no_sessions_means_no_dispatch() -> anyhow::Result<()> {
    let (daemon, _panes) = test_daemon()?;
    let id = daemon.queue.submit(&NewPrompt::new("hi"))?;
    assert!(!run_once(&daemon).await?);
    assert_eq!(daemon.store.get_prompt(id)?.status, PromptState::Pending);
    Ok(())
}

#[tokio::test]
async fn branch_mismatch_is_rejected() -> anyhow::Result<()> {
    let (daemon, panes) = test_daemon()?;
    register_idle(&daemon, &panes, "s1", Provider::Claude, "/repo/a", Some("main")).await?;

    let mut new = NewPrompt::new("hi");
    new.metadata.working_dir = Some("/repo/a".into());
    new.metadata.git_branch = Some("release".into());
    let id = daemon.queue.submit(&new)?;

    assert!(run_once(&daemon).await?);
    let prompt = daemon.store.get_prompt(id)?;
    assert_eq!(prompt.status, PromptState::Pending);
    assert_eq!(prompt.retry_count, 1);
    assert!(prompt
        .error
        .as_deref()
        .is_some_and(|e| e.contains(ErrorKind::ContextMismatch.as_str())));
    Ok(())
}
