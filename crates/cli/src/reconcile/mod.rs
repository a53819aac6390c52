// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background reconciliation loops.
//!
//! Each loop has a single responsibility and its own cadence; all of them
//! communicate exclusively through the store's conditional transitions, so a
//! race against the dispatcher resolves as a `Conflict` the loser logs and
//! re-reads.

pub mod completion;
pub mod reaper;
pub mod retry;
pub mod stuck;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::run::Daemon;
use crate::store::epoch_ms;

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn report(name: &str, outcome: crate::error::Result<usize>) {
    match outcome {
        Ok(0) => {}
        Ok(n) => debug!("{name}: {n} change(s)"),
        Err(e) => warn!("{name}: {e}"),
    }
}

/// Spawn every reconciliation loop. The handles finish when the daemon's
/// shutdown token fires.
pub fn spawn_all(daemon: &Arc<Daemon>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    // Completion sweep: sentinels, cancellation intents, per-prompt timeouts.
    {
        let daemon = Arc::clone(daemon);
        handles.push(tokio::spawn(async move {
            let mut sweeper = completion::Sweeper::new();
            let mut interval = ticker(daemon.config.completion_sweep_interval());
            loop {
                tokio::select! {
                    _ = daemon.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                report("completion sweep", sweeper.sweep_once(&daemon, epoch_ms()).await);
            }
            debug!("completion sweep stopped");
        }));
    }

    // Retry driver: failed → pending once the backoff deadline passes.
    {
        let daemon = Arc::clone(daemon);
        handles.push(tokio::spawn(async move {
            let mut interval = ticker(daemon.config.retry_driver_interval());
            loop {
                tokio::select! {
                    _ = daemon.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                report("retry driver", retry::drive(&daemon, epoch_ms()));
            }
            debug!("retry driver stopped");
        }));
    }

    // Stuck detector: busy sessions with no output change past the deadline.
    {
        let daemon = Arc::clone(daemon);
        handles.push(tokio::spawn(async move {
            let mut interval = ticker(daemon.config.stuck_detector_interval());
            loop {
                tokio::select! {
                    _ = daemon.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                report("stuck detector", stuck::detect(&daemon, epoch_ms()).await);
            }
            debug!("stuck detector stopped");
        }));
    }

    // Lock reaper.
    {
        let daemon = Arc::clone(daemon);
        handles.push(tokio::spawn(async move {
            let mut interval = ticker(daemon.config.lock_reap_interval());
            loop {
                tokio::select! {
                    _ = daemon.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                report("lock reaper", reaper::reap(&daemon, epoch_ms()));
            }
            debug!("lock reaper stopped");
        }));
    }

    // Retention cleanup.
    {
        let daemon = Arc::clone(daemon);
        handles.push(tokio::spawn(async move {
            let mut interval = ticker(daemon.config.cleanup_interval());
            loop {
                tokio::select! {
                    _ = daemon.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                report("cleanup", reaper::cleanup(&daemon, epoch_ms()));
            }
            debug!("cleanup stopped");
        }));
    }

    handles
}
