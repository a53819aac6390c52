// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Producer and admin subcommands. Each opens the store directly and prints
//! JSON; a running daemon observes the writes through the shared database.

use std::str::FromStr;
use std::sync::Arc;

use clap::Args;
use serde::Serialize;

use crate::config::Config;
use crate::queue::Queue;
use crate::sentinel::Provider;
use crate::store::{epoch_ms, NewPrompt, PromptState, SessionStatus, Store};

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Prompt text to deliver to a session.
    pub content: String,

    /// Priority, higher first (-10..=10).
    #[arg(long, default_value = "0")]
    pub priority: i64,

    /// Free-form origin tag.
    #[arg(long, default_value = "cli")]
    pub source: String,

    /// Pin to one session by name.
    #[arg(long)]
    pub target_session: Option<String>,

    /// Restrict to sessions of one provider.
    #[arg(long)]
    pub target_provider: Option<String>,

    /// Required working directory for the session.
    #[arg(long)]
    pub working_dir: Option<String>,

    /// Required git branch.
    #[arg(long)]
    pub branch: Option<String>,

    /// Environment variables as KEY=VALUE (repeatable).
    #[arg(long = "env")]
    pub env_vars: Vec<String>,

    /// Commands to run in the session before the prompt (repeatable).
    #[arg(long = "prereq")]
    pub prerequisites: Vec<String>,

    /// Maximum automatic retries (defaults from config).
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Per-attempt timeout in minutes (defaults from config).
    #[arg(long)]
    pub timeout_minutes: Option<u32>,
}

#[derive(Debug, Args)]
pub struct IdArgs {
    /// Prompt id.
    pub id: i64,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Filter by state (pending, assigned, in_progress, completed, failed, cancelled).
    #[arg(long)]
    pub status: Option<String>,

    #[arg(long, default_value = "50")]
    pub limit: usize,

    #[arg(long, default_value = "0")]
    pub offset: usize,
}

#[derive(Debug, Args)]
pub struct SessionsArgs {
    /// Filter by status (idle, busy, offline, unknown).
    #[arg(long)]
    pub status: Option<String>,
}

#[derive(Debug, Args)]
pub struct RegisterArgs {
    /// Session name (matches the tmux session).
    pub name: String,

    /// Provider tag (claude, codex, ollama, gemini, comet, unknown).
    #[arg(long, default_value = "unknown")]
    pub provider: String,
}

#[derive(Debug, Args)]
pub struct NameArgs {
    /// Session name.
    pub name: String,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Filter by prompt id.
    #[arg(long)]
    pub prompt_id: Option<i64>,

    /// Filter by session name.
    #[arg(long)]
    pub session: Option<String>,

    #[arg(long, default_value = "50")]
    pub limit: usize,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open(config: &Config) -> anyhow::Result<Arc<Store>> {
    Ok(Arc::new(Store::open(&config.db)?))
}

pub fn submit(config: &Config, args: &SubmitArgs) -> anyhow::Result<()> {
    let store = open(config)?;
    let queue = Queue::new(Arc::clone(&store), config.retry_base_seconds);

    let mut new = NewPrompt::new(args.content.clone());
    new.priority = args.priority;
    new.source = args.source.clone();
    new.target_session = args.target_session.clone();
    new.target_provider = args.target_provider.as_deref().map(Provider::from_str).transpose()?;
    new.max_retries = args.max_retries.unwrap_or(config.default_max_retries);
    new.timeout_minutes = args.timeout_minutes.unwrap_or(config.default_timeout_minutes);
    new.metadata.working_dir = args.working_dir.as_deref().map(Into::into);
    new.metadata.git_branch = args.branch.clone();
    new.metadata.prerequisites = args.prerequisites.clone();
    for pair in &args.env_vars {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--env expects KEY=VALUE, got '{pair}'"))?;
        new.metadata.env_vars.insert(key.to_owned(), value.to_owned());
    }

    let id = queue.submit(&new)?;
    print_json(&serde_json::json!({ "id": id }))
}

pub fn get(config: &Config, args: &IdArgs) -> anyhow::Result<()> {
    let store = open(config)?;
    print_json(&store.get_prompt(args.id)?)
}

pub fn cancel(config: &Config, args: &IdArgs) -> anyhow::Result<()> {
    let store = open(config)?;
    let queue = Queue::new(store, config.retry_base_seconds);
    let outcome = queue.cancel(args.id)?;
    print_json(&serde_json::json!({ "id": args.id, "outcome": format!("{outcome:?}") }))
}

pub fn retry(config: &Config, args: &IdArgs) -> anyhow::Result<()> {
    let store = open(config)?;
    let queue = Queue::new(store, config.retry_base_seconds);
    queue.retry(args.id)?;
    print_json(&serde_json::json!({ "id": args.id, "outcome": "requeued" }))
}

pub fn list(config: &Config, args: &ListArgs) -> anyhow::Result<()> {
    let store = open(config)?;
    let status = args.status.as_deref().map(PromptState::from_str).transpose()?;
    print_json(&store.list_prompts(status, args.limit, args.offset)?)
}

pub fn sessions(config: &Config, args: &SessionsArgs) -> anyhow::Result<()> {
    let store = open(config)?;
    let status = args.status.as_deref().map(SessionStatus::from_str).transpose()?;
    print_json(&store.list_sessions(status)?)
}

pub fn register(config: &Config, args: &RegisterArgs) -> anyhow::Result<()> {
    let store = open(config)?;
    store.upsert_session(&args.name, Provider::from_str(&args.provider)?)?;
    print_json(&store.get_session(&args.name)?)
}

pub fn deregister(config: &Config, args: &NameArgs) -> anyhow::Result<()> {
    let store = open(config)?;
    store.delete_session(&args.name)?;
    print_json(&serde_json::json!({ "deregistered": args.name }))
}

pub fn locks(config: &Config) -> anyhow::Result<()> {
    let store = open(config)?;
    print_json(&store.list_locks(true)?)
}

pub fn history(config: &Config, args: &HistoryArgs) -> anyhow::Result<()> {
    let store = open(config)?;
    print_json(&store.assignment_history(args.prompt_id, args.session.as_deref(), args.limit)?)
}

pub fn stats(config: &Config) -> anyhow::Result<()> {
    let store = open(config)?;
    print_json(&store.stats()?)
}

pub fn cleanup(config: &Config) -> anyhow::Result<()> {
    let store = open(config)?;
    let cutoff = epoch_ms().saturating_sub(config.retention_ms());
    let prompts = store.cleanup_terminal(cutoff)?;
    let logs = store.prune_assignments(cutoff)?;
    print_json(&serde_json::json!({ "prompts_removed": prompts, "log_rows_removed": logs }))
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
