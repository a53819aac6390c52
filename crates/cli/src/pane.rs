// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-oriented access to terminal panes.
//!
//! Two primitives: send keys to a pane, and capture the last N lines of its
//! rendered output. Panes may be created, destroyed, attached, or detached
//! by the operator at any time; every call tolerates a vanished pane.

use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Abstract pane surface. The production implementation shells out to tmux;
/// tests substitute a scripted fake.
pub trait Panes: Send + Sync {
    /// Names of all panes currently alive.
    fn list(&self) -> anyhow::Result<Vec<String>>;

    /// Whether a pane with this name exists right now.
    fn exists(&self, name: &str) -> bool;

    /// Capture the last `lines` rendered lines of the pane.
    fn capture(&self, name: &str, lines: u16) -> anyhow::Result<String>;

    /// Write literal keystrokes; `commit` appends a line terminator so the
    /// pane executes them.
    fn send_keys(&self, name: &str, text: &str, commit: bool) -> anyhow::Result<()>;

    /// Send an interrupt (Ctrl-C) to the pane.
    fn send_interrupt(&self, name: &str) -> anyhow::Result<()>;
}

/// tmux-backed panes. Each foreman session name is a tmux session name; the
/// target is that session's active pane.
pub struct TmuxPanes {
    socket: Option<PathBuf>,
}

impl TmuxPanes {
    pub fn new(socket: Option<PathBuf>) -> Self {
        Self { socket }
    }

    /// Build a tmux `Command`, prepending `-S <socket>` if set.
    fn tmux_cmd(&self) -> Command {
        let mut cmd = Command::new("tmux");
        if let Some(ref s) = self.socket {
            cmd.arg("-S").arg(s);
        }
        cmd
    }
}

impl Panes for TmuxPanes {
    fn list(&self) -> anyhow::Result<Vec<String>> {
        let output = self
            .tmux_cmd()
            .args(["list-sessions", "-F", "#{session_name}"])
            .stderr(Stdio::null())
            .output();
        match output {
            Ok(out) if out.status.success() => Ok(String::from_utf8_lossy(&out.stdout)
                .lines()
                .map(str::to_owned)
                .filter(|l| !l.is_empty())
                .collect()),
            // No server running means no panes, not an error.
            Ok(_) => Ok(vec![]),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                anyhow::bail!("tmux is not installed or not in PATH")
            }
            Err(e) => Err(anyhow::Error::new(e).context("failed to list tmux sessions")),
        }
    }

    fn exists(&self, name: &str) -> bool {
        self.tmux_cmd()
            .args(["has-session", "-t", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn capture(&self, name: &str, lines: u16) -> anyhow::Result<String> {
        let start = format!("-{lines}");
        let out = self
            .tmux_cmd()
            .args(["capture-pane", "-p", "-t", name, "-S", &start])
            .stderr(Stdio::null())
            .output()?;
        if !out.status.success() {
            anyhow::bail!("tmux capture-pane failed for '{name}'");
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    fn send_keys(&self, name: &str, text: &str, commit: bool) -> anyhow::Result<()> {
        let status = self
            .tmux_cmd()
            .args(["send-keys", "-l", "-t", name, text])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            anyhow::bail!("tmux send-keys failed for '{name}'");
        }
        if commit {
            let status = self
                .tmux_cmd()
                .args(["send-keys", "-t", name, "Enter"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()?;
            if !status.success() {
                anyhow::bail!("tmux send-keys Enter failed for '{name}'");
            }
        }
        Ok(())
    }

    fn send_interrupt(&self, name: &str) -> anyhow::Result<()> {
        let status = self
            .tmux_cmd()
            .args(["send-keys", "-t", name, "C-c"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            anyhow::bail!("tmux send-keys C-c failed for '{name}'");
        }
        Ok(())
    }
}
