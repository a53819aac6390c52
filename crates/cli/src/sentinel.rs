// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider tags and the pane-tail markers used to classify each provider's
//! output: an idle prompt marker, plus success/failure phrases scanned by the
//! completion sweep.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Coarse tag identifying the kind of agent running in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Codex,
    Ollama,
    Gemini,
    Comet,
    Unknown,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Ollama => "ollama",
            Self::Gemini => "gemini",
            Self::Comet => "comet",
            Self::Unknown => "unknown",
        }
    }

    pub const ALL: [Provider; 6] = [
        Provider::Claude,
        Provider::Codex,
        Provider::Ollama,
        Provider::Gemini,
        Provider::Comet,
        Provider::Unknown,
    ];
}

impl FromStr for Provider {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "ollama" => Ok(Self::Ollama),
            "gemini" => Ok(Self::Gemini),
            "comet" => Ok(Self::Comet),
            "unknown" => Ok(Self::Unknown),
            other => Err(crate::error::Error::invalid_input(format!("unknown provider: {other}"))),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tail markers for one provider.
///
/// `idle` markers are prefixes of the last non-empty captured line; `success`
/// and `failure` are phrases matched anywhere in the captured tail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentinel {
    pub idle: Vec<String>,
    pub success: Vec<String>,
    pub failure: Vec<String>,
}

impl Sentinel {
    fn new(idle: &[&str], success: &[&str], failure: &[&str]) -> Self {
        Self {
            idle: idle.iter().map(|s| (*s).to_owned()).collect(),
            success: success.iter().map(|s| (*s).to_owned()).collect(),
            failure: failure.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    /// True if the last non-empty line of `tail` starts with an idle marker.
    pub fn matches_idle(&self, tail: &str) -> bool {
        let Some(last) = tail.lines().rev().map(str::trim).find(|l| !l.is_empty()) else {
            // An empty pane is a bare shell waiting at a prompt that scrolled
            // away; treat as idle only when no markers are configured.
            return self.idle.is_empty();
        };
        self.idle.iter().any(|m| last.starts_with(m.as_str()))
    }

    /// Return the first matching success phrase in `tail`, if any.
    pub fn match_success<'a>(&self, tail: &'a str) -> Option<&'a str> {
        match_phrase(&self.success, tail)
    }

    /// Return the first line of `tail` containing a failure phrase, if any.
    pub fn match_failure<'a>(&self, tail: &'a str) -> Option<&'a str> {
        match_phrase(&self.failure, tail)
    }
}

/// Find the first line of `tail` containing one of `phrases`.
fn match_phrase<'a>(phrases: &[String], tail: &'a str) -> Option<&'a str> {
    tail.lines().find(|line| phrases.iter().any(|p| !p.is_empty() && line.contains(p.as_str())))
}

/// The full per-provider sentinel table.
#[derive(Debug, Clone)]
pub struct SentinelBook {
    by_provider: HashMap<Provider, Sentinel>,
}

impl Default for SentinelBook {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SentinelBook {
    /// Built-in defaults for every known provider.
    pub fn builtin() -> Self {
        let mut by_provider = HashMap::new();
        by_provider.insert(
            Provider::Claude,
            Sentinel::new(
                &["\u{276f}"],
                &["FOREMAN_DONE"],
                &["FOREMAN_FAIL", "API Error", "Credit balance is too low"],
            ),
        );
        by_provider.insert(
            Provider::Codex,
            Sentinel::new(&["\u{203a}"], &["FOREMAN_DONE"], &["FOREMAN_FAIL", "stream error"]),
        );
        by_provider.insert(
            Provider::Ollama,
            Sentinel::new(&[">>>"], &["FOREMAN_DONE"], &["FOREMAN_FAIL", "Error:"]),
        );
        by_provider.insert(
            Provider::Gemini,
            Sentinel::new(&[">"], &["FOREMAN_DONE"], &["FOREMAN_FAIL", "Quota exceeded"]),
        );
        by_provider.insert(
            Provider::Comet,
            Sentinel::new(&["comet>"], &["FOREMAN_DONE"], &["FOREMAN_FAIL"]),
        );
        by_provider.insert(
            Provider::Unknown,
            Sentinel::new(&["$", "\u{276f}", ">", "%"], &["FOREMAN_DONE"], &["FOREMAN_FAIL"]),
        );
        Self { by_provider }
    }

    /// Load overrides from a JSON file (`{"claude": {"idle": [...], ...}}`)
    /// on top of the built-in defaults. Providers absent from the file keep
    /// their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let overrides: HashMap<Provider, Sentinel> = serde_json::from_str(&text)?;
        let mut book = Self::builtin();
        book.by_provider.extend(overrides);
        Ok(book)
    }

    pub fn get(&self, provider: Provider) -> &Sentinel {
        self.by_provider.get(&provider).unwrap_or_else(|| &self.by_provider[&Provider::Unknown])
    }

    /// Replace a single provider's sentinel set (used by tests and overrides).
    pub fn set(&mut self, provider: Provider, sentinel: Sentinel) {
        self.by_provider.insert(provider, sentinel);
    }
}

#[cfg(test)]
#[path = "sentinel_tests.rs"]
mod tests;
