// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;
use std::str::FromStr;

use yare::parameterized;

use super::{Provider, Sentinel, SentinelBook};

#[parameterized(
    claude = { "claude", Provider::Claude },
    codex = { "Codex", Provider::Codex },
    ollama = { "OLLAMA", Provider::Ollama },
    gemini = { "gemini", Provider::Gemini },
    comet = { "comet", Provider::Comet },
    unknown = { "unknown", Provider::Unknown },
)]
fn provider_parse_roundtrip(input: &str, expected: Provider) -> anyhow::Result<()> {
    let parsed = Provider::from_str(input)?;
    assert_eq!(parsed, expected);
    assert_eq!(Provider::from_str(parsed.as_str())?, expected);
    Ok(())
}

#[test]
fn bogus_provider_rejected() {
    assert!(Provider::from_str("gpt-17").is_err());
}

#[test]
fn idle_marker_matches_last_nonempty_line() {
    let s = SentinelBook::builtin();
    let claude = s.get(Provider::Claude);
    assert!(claude.matches_idle("some output\n\u{276f} \n\n"));
    assert!(!claude.matches_idle("some output\nstill thinking..."));
}

#[test]
fn success_returns_matching_line() {
    let s = Sentinel {
        idle: vec![],
        success: vec!["FOREMAN_DONE".into()],
        failure: vec![],
    };
    let tail = "working\nresult: 4\nFOREMAN_DONE all tests pass\n$";
    assert_eq!(s.match_success(tail), Some("FOREMAN_DONE all tests pass"));
    assert_eq!(s.match_failure(tail), None);
}

#[test]
fn failure_beats_empty_patterns() {
    let s = Sentinel { idle: vec![], success: vec![], failure: vec!["API Error".into()] };
    assert!(s.match_failure("x\nAPI Error: overloaded\n").is_some());
    // Empty phrase lists never match anything.
    let empty = Sentinel { idle: vec![], success: vec![], failure: vec![] };
    assert_eq!(empty.match_failure("API Error"), None);
}

#[test]
fn load_overrides_single_provider() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"{{"claude": {{"idle": ["%%"], "success": ["ALL GREEN"], "failure": []}}}}"#
    )?;
    let book = SentinelBook::load(file.path())?;
    assert!(book.get(Provider::Claude).matches_idle("%% "));
    assert!(book.get(Provider::Claude).match_success("ALL GREEN\n").is_some());
    // Other providers keep their defaults.
    assert!(book.get(Provider::Ollama).matches_idle(">>> "));
    Ok(())
}
