// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session probe: derives each session's observable state from its pane
//! without disturbing the agent.
//!
//! Idle detection requires both the provider's prompt marker on the last
//! non-empty line and quiescence: the captured tail unchanged since at least
//! `idle_quiet_ms` ago. Context (working directory, branch) is extracted by
//! echoing a token-delimited query into the pane and parsing the tail.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;

use crate::error::{Error, ErrorKind, Result};
use crate::pane::Panes;
use crate::sentinel::{Provider, SentinelBook};
use crate::store::{epoch_ms, SessionStatus};

/// Prefix of the context-query token echoed into panes.
const CONTEXT_MARKER: &str = "__fmctx_";

/// How long `refresh_context` waits for the pane to answer.
const CONTEXT_WAIT: Duration = Duration::from_millis(250);
const CONTEXT_ATTEMPTS: u32 = 8;

/// One observation of a session's pane.
#[derive(Debug, Clone)]
pub struct Observation {
    pub exists: bool,
    pub status: SessionStatus,
    pub last_output: String,
    pub working_dir: Option<PathBuf>,
    pub git_branch: Option<String>,
    /// Whether the tail differed from the previous observation.
    pub changed: bool,
    /// When the tail last differed, from the probe's shared capture state.
    /// Stable across interleaved observers (probe loop and sweep), so the
    /// registry's `last_activity` never misses a change one of them consumed.
    pub changed_at: u64,
    pub observed_at: u64,
}

struct PrevCapture {
    text: String,
    changed_at: u64,
}

pub struct Probe {
    panes: Arc<dyn Panes>,
    sentinels: SentinelBook,
    capture_lines: u16,
    idle_quiet_ms: u64,
    prev: Mutex<HashMap<String, PrevCapture>>,
}

impl Probe {
    pub fn new(
        panes: Arc<dyn Panes>,
        sentinels: SentinelBook,
        capture_lines: u16,
        idle_quiet_ms: u64,
    ) -> Self {
        Self { panes, sentinels, capture_lines, idle_quiet_ms, prev: Mutex::new(HashMap::new()) }
    }

    pub fn panes(&self) -> &Arc<dyn Panes> {
        &self.panes
    }

    /// Observe one session. Never fails: capture problems degrade the status
    /// to `unknown`, a vanished pane to `offline`.
    pub fn observe(&self, name: &str, provider: Provider) -> Observation {
        let now = epoch_ms();
        if !self.panes.exists(name) {
            self.prev.lock().remove(name);
            return Observation {
                exists: false,
                status: SessionStatus::Offline,
                last_output: String::new(),
                working_dir: None,
                git_branch: None,
                changed: false,
                changed_at: now,
                observed_at: now,
            };
        }
        let tail = match self.panes.capture(name, self.capture_lines) {
            Ok(t) => t,
            Err(_) => {
                return Observation {
                    exists: true,
                    status: SessionStatus::Unknown,
                    last_output: String::new(),
                    working_dir: None,
                    git_branch: None,
                    changed: false,
                    changed_at: now,
                    observed_at: now,
                };
            }
        };

        let (changed, quiet_since) = {
            let mut prev = self.prev.lock();
            match prev.get_mut(name) {
                Some(entry) if entry.text == tail => (false, entry.changed_at),
                Some(entry) => {
                    entry.text = tail.clone();
                    entry.changed_at = now;
                    (true, now)
                }
                None => {
                    prev.insert(name.to_owned(), PrevCapture { text: tail.clone(), changed_at: now });
                    (true, now)
                }
            }
        };

        let sentinel = self.sentinels.get(provider);
        let quiesced = !changed && now.saturating_sub(quiet_since) >= self.idle_quiet_ms;
        let status = if sentinel.matches_idle(&tail) && quiesced {
            SessionStatus::Idle
        } else {
            SessionStatus::Busy
        };

        let (working_dir, git_branch) = match parse_context_line(&tail) {
            Some(ctx) => (Some(ctx.working_dir), ctx.git_branch),
            None => (None, None),
        };

        Observation {
            exists: true,
            status,
            last_output: tail,
            working_dir,
            git_branch,
            changed,
            changed_at: quiet_since,
            observed_at: now,
        }
    }

    /// Write keystrokes into the pane. Fails `NotFound` when the pane is gone.
    pub fn inject(&self, name: &str, keys: &str, commit: bool) -> Result<()> {
        if !self.panes.exists(name) {
            return Err(Error::not_found(format!("pane {name}")));
        }
        self.panes
            .send_keys(name, keys, commit)
            .map_err(|e| Error::new(ErrorKind::StorageUnavailable, e.to_string()))
    }

    /// Send an interrupt keystroke to the pane.
    pub fn interrupt(&self, name: &str) -> Result<()> {
        if !self.panes.exists(name) {
            return Err(Error::not_found(format!("pane {name}")));
        }
        self.panes
            .send_interrupt(name)
            .map_err(|e| Error::new(ErrorKind::StorageUnavailable, e.to_string()))
    }

    /// Run an inert query in the pane to learn its current working directory
    /// and branch. Returns `None` when the pane never answers; the caller
    /// degrades the session to unknown context rather than failing.
    pub async fn refresh_context(&self, name: &str) -> Option<(PathBuf, Option<String>)> {
        let token = format!(
            "{CONTEXT_MARKER}{}__",
            uuid::Uuid::new_v4().simple().to_string().get(..8).unwrap_or("00000000")
        );
        let query = format!(
            "echo \"{token} $(pwd) $(git rev-parse --abbrev-ref HEAD 2>/dev/null || echo -)\""
        );
        self.panes.send_keys(name, &query, true).ok()?;

        for _ in 0..CONTEXT_ATTEMPTS {
            tokio::time::sleep(CONTEXT_WAIT).await;
            let Ok(tail) = self.panes.capture(name, self.capture_lines) else {
                return None;
            };
            if let Some(ctx) = parse_tokenized_context(&tail, &token) {
                return Some(ctx);
            }
        }
        None
    }

    /// Drop cached capture state for a deregistered session.
    pub fn forget(&self, name: &str) {
        self.prev.lock().remove(name);
    }
}

/// A parsed `__fmctx_<token>__ <cwd> <branch>` line.
struct ContextLine {
    working_dir: PathBuf,
    git_branch: Option<String>,
}

// The echoed command itself contains the token with unexpanded `$(pwd)`, so
// only lines that start with the token and carry an absolute path count.
fn context_regex() -> Option<Regex> {
    Regex::new(r"(?m)^__fmctx_[0-9a-f]{8}__ (/\S*) (\S+)\s*$").ok()
}

/// Extract the newest context line anywhere in the tail.
fn parse_context_line(tail: &str) -> Option<ContextLine> {
    let re = context_regex()?;
    let caps = re.captures_iter(tail).last()?;
    Some(ContextLine {
        working_dir: PathBuf::from(&caps[1]),
        git_branch: normalize_branch(&caps[2]),
    })
}

/// Extract the context line for one specific query token.
fn parse_tokenized_context(tail: &str, token: &str) -> Option<(PathBuf, Option<String>)> {
    for line in tail.lines() {
        let Some(rest) = line.strip_prefix(token) else { continue };
        let mut parts = rest.split_whitespace();
        let dir = parts.next()?;
        if !dir.starts_with('/') {
            continue;
        }
        let branch = parts.next().and_then(normalize_branch);
        return Some((PathBuf::from(dir), branch));
    }
    None
}

fn normalize_branch(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed == "HEAD" {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// If `keys` is a context query, return its token. Used by the fake pane to
/// answer queries the way a live shell would.
pub fn context_token(keys: &str) -> Option<String> {
    let start = keys.find(CONTEXT_MARKER)?;
    let rest = &keys[start..];
    let end = rest.find(' ').unwrap_or(rest.len());
    let token = &rest[..end];
    if token.ends_with("__") && token.len() > CONTEXT_MARKER.len() + 2 {
        Some(token.to_owned())
    } else {
        None
    }
}

#[cfg(test)]
#[path = "probe_tests.rs"]
mod tests;
