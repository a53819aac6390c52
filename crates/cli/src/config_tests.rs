// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::Config;

#[test]
fn defaults_are_valid() -> anyhow::Result<()> {
    let config = Config::parse_from(["foreman"]);
    config.validate()?;
    assert_eq!(config.parallelism, 4);
    assert_eq!(config.default_timeout_minutes, 30);
    assert_eq!(config.default_max_retries, 3);
    assert_eq!(config.probe_interval_ms, 2000);
    assert_eq!(config.lock_ttl_seconds, 7200);
    assert_eq!(config.retention_days, 7);
    assert_eq!(config.scan_limit, 256);
    Ok(())
}

#[test]
fn zero_parallelism_rejected() {
    let config = Config::parse_from(["foreman", "--parallelism", "0"]);
    assert!(config.validate().is_err());
}

#[test]
fn zero_timeout_rejected() {
    let config = Config::parse_from(["foreman", "--default-timeout-minutes", "0"]);
    assert!(config.validate().is_err());
}

#[test]
fn durations_derive_from_millis() {
    let config =
        Config::parse_from(["foreman", "--probe-interval-ms", "500", "--warm-seconds", "10"]);
    assert_eq!(config.probe_interval().as_millis(), 500);
    assert_eq!(config.warm_threshold_ms(), 10_000);
}

#[test]
fn retention_converts_days_to_millis() {
    let config = Config::parse_from(["foreman", "--retention-days", "2"]);
    assert_eq!(config.retention_ms(), 2 * 24 * 60 * 60 * 1000);
}
