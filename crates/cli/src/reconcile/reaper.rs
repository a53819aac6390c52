// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock reaper and retention cleanup.

use tracing::info;

use crate::run::Daemon;

/// Forcibly expire overdue locks. Returns the number expired.
pub fn reap(daemon: &Daemon, now_ms: u64) -> crate::error::Result<usize> {
    let reaped = daemon.locks.reap_expired(now_ms)?;
    for lock in &reaped {
        info!(
            path = %lock.path.display(),
            owner = %lock.owner_session,
            "expired overdue lock"
        );
    }
    Ok(reaped.len())
}

/// Drop terminal prompts and assignment rows past the retention window.
pub fn cleanup(daemon: &Daemon, now_ms: u64) -> crate::error::Result<usize> {
    let cutoff = now_ms.saturating_sub(daemon.config.retention_ms());
    let prompts = daemon.store.cleanup_terminal(cutoff)?;
    let logs = daemon.store.prune_assignments(cutoff)?;
    if prompts + logs > 0 {
        info!(prompts, logs, "retention cleanup");
    }
    Ok(prompts + logs)
}
