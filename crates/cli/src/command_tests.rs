// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use crate::config::Config;
use crate::store::{PromptState, Store};

use super::{IdArgs, RegisterArgs, SubmitArgs};

fn config_for(dir: &tempfile::TempDir) -> Config {
    let db = dir.path().join("foreman.db").to_string_lossy().into_owned();
    Config::parse_from(["foreman", "--db", db.as_str()])
}

fn submit_args(content: &str) -> SubmitArgs {
    SubmitArgs {
        content: content.to_owned(),
        priority: 0,
        source: "cli".into(),
        target_session: None,
        target_provider: None,
        working_dir: None,
        branch: None,
        env_vars: vec![],
        prerequisites: vec![],
        max_retries: None,
        timeout_minutes: None,
    }
}

#[test]
fn submit_writes_through_the_shared_db() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_for(&dir);

    let mut args = submit_args("hello");
    args.priority = 2;
    args.env_vars = vec!["CI=1".into()];
    super::submit(&config, &args)?;

    let store = Store::open(&config.db)?;
    let pending = store.list_pending(10)?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].content, "hello");
    assert_eq!(pending[0].priority, 2);
    assert_eq!(pending[0].max_retries, config.default_max_retries);
    assert_eq!(pending[0].metadata.env_vars.get("CI").map(String::as_str), Some("1"));
    Ok(())
}

#[test]
fn malformed_env_pair_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_for(&dir);
    let mut args = submit_args("hello");
    args.env_vars = vec!["NOT-A-PAIR".into()];
    assert!(super::submit(&config, &args).is_err());
    Ok(())
}

#[test]
fn cancel_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_for(&dir);
    super::submit(&config, &submit_args("x"))?;

    super::cancel(&config, &IdArgs { id: 1 })?;
    let store = Store::open(&config.db)?;
    assert_eq!(store.get_prompt(1)?.status, PromptState::Cancelled);
    Ok(())
}

#[test]
fn register_creates_session_row() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_for(&dir);
    super::register(&config, &RegisterArgs { name: "claude_1".into(), provider: "claude".into() })?;

    let store = Store::open(&config.db)?;
    let sessions = store.list_sessions(None)?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].name, "claude_1");
    Ok(())
}

#[test]
fn bad_provider_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_for(&dir);
    let result =
        super::register(&config, &RegisterArgs { name: "x_1".into(), provider: "gpt9".into() });
    assert!(result.is_err());
    Ok(())
}
