// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scripted pane surface standing in for tmux,
//! and a daemon harness wired to it over an in-memory store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use parking_lot::Mutex;

use crate::config::Config;
use crate::pane::Panes;
use crate::run::Daemon;
use crate::sentinel::{Provider, SentinelBook};
use crate::store::Store;

/// One keystroke batch written to a fake pane.
#[derive(Debug, Clone)]
pub struct SentKeys {
    pub text: String,
    pub commit: bool,
}

#[derive(Debug, Default)]
struct FakePane {
    tail: String,
    sent: Vec<SentKeys>,
    interrupts: u32,
    /// Simulated shell state answering `cd` and context queries.
    cwd: Option<PathBuf>,
    branch: Option<String>,
    /// When false, `cd` keystrokes are swallowed (a broken shell).
    obey_cd: bool,
}

/// In-memory [`Panes`] implementation with per-pane scripted tails.
///
/// The fake behaves like a live shell just enough for dispatch tests: `cd`
/// updates the pane's directory (unless disobedient) and a context query
/// echoes back the directory and branch under the query's own token.
#[derive(Default)]
pub struct FakePanes {
    panes: Mutex<HashMap<String, FakePane>>,
}

impl FakePanes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a pane with an initial working directory and branch.
    pub fn add(&self, name: &str, cwd: &str, branch: Option<&str>) {
        self.panes.lock().insert(
            name.to_owned(),
            FakePane {
                cwd: Some(PathBuf::from(cwd)),
                branch: branch.map(str::to_owned),
                obey_cd: true,
                ..FakePane::default()
            },
        );
    }

    pub fn remove(&self, name: &str) {
        self.panes.lock().remove(name);
    }

    /// Make `cd` keystrokes stop working on this pane.
    pub fn break_cd(&self, name: &str) {
        if let Some(pane) = self.panes.lock().get_mut(name) {
            pane.obey_cd = false;
        }
    }

    /// Replace the pane's visible tail.
    pub fn set_tail(&self, name: &str, tail: &str) {
        if let Some(pane) = self.panes.lock().get_mut(name) {
            pane.tail = tail.to_owned();
        }
    }

    /// Append a line to the pane's visible tail.
    pub fn append_line(&self, name: &str, line: &str) {
        if let Some(pane) = self.panes.lock().get_mut(name) {
            if !pane.tail.is_empty() && !pane.tail.ends_with('\n') {
                pane.tail.push('\n');
            }
            pane.tail.push_str(line);
            pane.tail.push('\n');
        }
    }

    pub fn sent(&self, name: &str) -> Vec<SentKeys> {
        self.panes.lock().get(name).map(|p| p.sent.clone()).unwrap_or_default()
    }

    pub fn interrupts(&self, name: &str) -> u32 {
        self.panes.lock().get(name).map(|p| p.interrupts).unwrap_or(0)
    }
}

impl Panes for FakePanes {
    fn list(&self) -> anyhow::Result<Vec<String>> {
        let mut names: Vec<String> = self.panes.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn exists(&self, name: &str) -> bool {
        self.panes.lock().contains_key(name)
    }

    fn capture(&self, name: &str, _lines: u16) -> anyhow::Result<String> {
        self.panes
            .lock()
            .get(name)
            .map(|p| p.tail.clone())
            .ok_or_else(|| anyhow::anyhow!("no pane named '{name}'"))
    }

    fn send_keys(&self, name: &str, text: &str, commit: bool) -> anyhow::Result<()> {
        let mut panes = self.panes.lock();
        let pane = panes.get_mut(name).ok_or_else(|| anyhow::anyhow!("no pane named '{name}'"))?;
        pane.sent.push(SentKeys { text: text.to_owned(), commit });
        if !commit {
            return Ok(());
        }
        if let Some(dir) = text.strip_prefix("cd ") {
            if pane.obey_cd {
                pane.cwd = Some(PathBuf::from(unquote(dir)));
            }
        } else if let Some(token) = crate::probe::context_token(text) {
            let cwd = pane.cwd.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
            let branch = pane.branch.clone().unwrap_or_else(|| "-".to_owned());
            let line = format!("{token} {cwd} {branch}");
            if !pane.tail.is_empty() && !pane.tail.ends_with('\n') {
                pane.tail.push('\n');
            }
            pane.tail.push_str(&line);
            pane.tail.push('\n');
        }
        Ok(())
    }

    fn send_interrupt(&self, name: &str) -> anyhow::Result<()> {
        let mut panes = self.panes.lock();
        let pane = panes.get_mut(name).ok_or_else(|| anyhow::anyhow!("no pane named '{name}'"))?;
        pane.interrupts += 1;
        Ok(())
    }
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('\'').trim_matches('"')
}

/// A daemon over an in-memory store and fake panes, with a zero idle-quiet
/// window so two consecutive observations settle a session's status.
pub fn test_daemon() -> crate::error::Result<(Arc<Daemon>, Arc<FakePanes>)> {
    test_daemon_with_args(&[])
}

/// Same as [`test_daemon`], with extra command-line overrides.
pub fn test_daemon_with_args(
    args: &[&str],
) -> crate::error::Result<(Arc<Daemon>, Arc<FakePanes>)> {
    let mut argv = vec!["foreman", "--idle-quiet-ms", "0"];
    argv.extend_from_slice(args);
    let config = Config::parse_from(argv);
    let store = Arc::new(Store::open_in_memory()?);
    let panes = FakePanes::new();
    let dyn_panes: Arc<dyn Panes> = Arc::clone(&panes) as Arc<dyn Panes>;
    let daemon = Daemon::build(config, store, dyn_panes, SentinelBook::builtin());
    Ok((daemon, panes))
}

/// Create a pane showing an idle prompt, register it, and observe it twice so
/// the registry sees it `idle`.
pub async fn register_idle(
    daemon: &Daemon,
    panes: &FakePanes,
    name: &str,
    provider: Provider,
    cwd: &str,
    branch: Option<&str>,
) -> crate::error::Result<()> {
    panes.add(name, cwd, branch);
    panes.set_tail(name, "\u{276f} \n");
    daemon.registry.register(name, provider).await?;
    observe_twice(daemon, name, provider).await
}

/// Feed two consecutive observations of `name` into the registry.
pub async fn observe_twice(
    daemon: &Daemon,
    name: &str,
    provider: Provider,
) -> crate::error::Result<()> {
    for _ in 0..2 {
        let obs = daemon.probe.observe(name, provider);
        daemon.registry.update_from_observation(name, &obs).await?;
    }
    Ok(())
}
