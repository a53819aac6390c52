// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Prompt-to-session dispatcher for AI coding agents.
#[derive(Debug, Clone, Parser)]
#[command(name = "foreman", version, about)]
pub struct Config {
    /// Path to the SQLite state database.
    #[arg(long, env = "FOREMAN_DB", default_value = "foreman.db")]
    pub db: PathBuf,

    /// HTTP port for the submission/inspection API (omit to disable).
    #[arg(long, env = "FOREMAN_PORT")]
    pub port: Option<u16>,

    /// Host address to bind to.
    #[arg(long, env = "FOREMAN_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// tmux server socket path (uses the default server when unset).
    #[arg(long, env = "FOREMAN_TMUX_SOCKET")]
    pub tmux_socket: Option<PathBuf>,

    /// Auto-register tmux panes named `<provider>_<n>` as sessions.
    #[arg(long, env = "FOREMAN_DISCOVER", default_value = "false")]
    pub discover: bool,

    /// Lines of pane tail to capture per observation.
    #[arg(long, env = "FOREMAN_CAPTURE_LINES", default_value = "50")]
    pub capture_lines: u16,

    /// Number of concurrent dispatcher workers.
    #[arg(long, env = "FOREMAN_PARALLELISM", default_value = "4")]
    pub parallelism: usize,

    /// Default per-prompt timeout in minutes.
    #[arg(long, env = "FOREMAN_DEFAULT_TIMEOUT_MINUTES", default_value = "30")]
    pub default_timeout_minutes: u32,

    /// Default maximum automatic retries per prompt.
    #[arg(long, env = "FOREMAN_DEFAULT_MAX_RETRIES", default_value = "3")]
    pub default_max_retries: u32,

    /// Observation cadence per session in milliseconds.
    #[arg(long, env = "FOREMAN_PROBE_INTERVAL_MS", default_value = "2000")]
    pub probe_interval_ms: u64,

    /// Quiescence required before a session is declared idle, in milliseconds.
    #[arg(long, env = "FOREMAN_IDLE_QUIET_MS", default_value = "2000")]
    pub idle_quiet_ms: u64,

    /// Default directory-lock lease in seconds.
    #[arg(long, env = "FOREMAN_LOCK_TTL_SECONDS", default_value = "7200")]
    pub lock_ttl_seconds: u64,

    /// Lock reaper cadence in seconds.
    #[arg(long, env = "FOREMAN_LOCK_REAP_SECONDS", default_value = "60")]
    pub lock_reap_seconds: u64,

    /// Completion sweep cadence in milliseconds.
    #[arg(long, env = "FOREMAN_COMPLETION_SWEEP_MS", default_value = "2000")]
    pub completion_sweep_ms: u64,

    /// Retry driver cadence in milliseconds.
    #[arg(long, env = "FOREMAN_RETRY_DRIVER_MS", default_value = "10000")]
    pub retry_driver_ms: u64,

    /// Stuck-session detector cadence in milliseconds.
    #[arg(long, env = "FOREMAN_STUCK_DETECTOR_MS", default_value = "30000")]
    pub stuck_detector_ms: u64,

    /// Terminal-state cleanup cadence in seconds.
    #[arg(long, env = "FOREMAN_CLEANUP_SECONDS", default_value = "3600")]
    pub cleanup_seconds: u64,

    /// Exponential retry backoff base in seconds.
    #[arg(long, env = "FOREMAN_RETRY_BASE_SECONDS", default_value = "30")]
    pub retry_base_seconds: u64,

    /// Age in days after which terminal prompts and log entries are removed.
    #[arg(long, env = "FOREMAN_RETENTION_DAYS", default_value = "7")]
    pub retention_days: u32,

    /// Maximum pending prompts scanned per matching tick.
    #[arg(long, env = "FOREMAN_SCAN_LIMIT", default_value = "256")]
    pub scan_limit: usize,

    /// Idle age below which a session still counts as context-warm, in seconds.
    #[arg(long, env = "FOREMAN_WARM_SECONDS", default_value = "300")]
    pub warm_seconds: u64,

    /// Path to a JSON file overriding the built-in provider sentinels.
    #[arg(long, env = "FOREMAN_SENTINEL_CONFIG")]
    pub sentinel_config: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "FOREMAN_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "FOREMAN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.parallelism == 0 {
            anyhow::bail!("--parallelism must be at least 1");
        }
        if self.capture_lines == 0 {
            anyhow::bail!("--capture-lines must be at least 1");
        }
        if self.default_timeout_minutes == 0 {
            anyhow::bail!("--default-timeout-minutes must be at least 1");
        }
        if self.probe_interval_ms == 0 || self.completion_sweep_ms == 0 {
            anyhow::bail!("loop cadences must be non-zero");
        }
        if self.scan_limit == 0 {
            anyhow::bail!("--scan-limit must be at least 1");
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn idle_quiet(&self) -> Duration {
        Duration::from_millis(self.idle_quiet_ms)
    }

    pub fn lock_reap_interval(&self) -> Duration {
        Duration::from_secs(self.lock_reap_seconds)
    }

    pub fn completion_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.completion_sweep_ms)
    }

    pub fn retry_driver_interval(&self) -> Duration {
        Duration::from_millis(self.retry_driver_ms)
    }

    pub fn stuck_detector_interval(&self) -> Duration {
        Duration::from_millis(self.stuck_detector_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_seconds)
    }

    pub fn warm_threshold_ms(&self) -> u64 {
        self.warm_seconds.saturating_mul(1000)
    }

    pub fn retention_ms(&self) -> u64 {
        u64::from(self.retention_days).saturating_mul(24 * 60 * 60 * 1000)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
