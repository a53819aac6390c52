// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon assembly — shared by `main` and integration tests.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::locks::LockManager;
use crate::pane::{Panes, TmuxPanes};
use crate::probe::Probe;
use crate::queue::Queue;
use crate::registry::Registry;
use crate::sentinel::{Provider, SentinelBook};
use crate::store::{epoch_ms, AssignmentAction, PromptState, Store, Transition};

/// Bound on concurrent pane observations per probe tick.
pub const PROBE_CONCURRENCY: usize = 16;

/// Everything a running foreman shares: the store and the single owner of
/// each subsystem. All loops and the HTTP API hold this behind an `Arc`.
pub struct Daemon {
    pub config: Config,
    pub store: Arc<Store>,
    pub registry: Registry,
    pub locks: LockManager,
    pub queue: Queue,
    pub probe: Probe,
    pub sentinels: SentinelBook,
    pub shutdown: CancellationToken,
    pub started_at: u64,
    pub dispatch_permits: Arc<Semaphore>,
}

impl Daemon {
    /// Wire a daemon from its parts. Used directly by tests; `run` assembles
    /// the production pieces.
    pub fn build(
        config: Config,
        store: Arc<Store>,
        panes: Arc<dyn Panes>,
        sentinels: SentinelBook,
    ) -> Arc<Self> {
        let registry = Registry::new(Arc::clone(&store));
        let locks = LockManager::new(Arc::clone(&store), config.lock_ttl_seconds);
        let queue = Queue::new(Arc::clone(&store), config.retry_base_seconds);
        let probe =
            Probe::new(panes, sentinels.clone(), config.capture_lines, config.idle_quiet_ms);
        let dispatch_permits = Arc::new(Semaphore::new(config.parallelism));
        Arc::new(Self {
            store,
            registry,
            locks,
            queue,
            probe,
            sentinels,
            shutdown: CancellationToken::new(),
            started_at: epoch_ms(),
            dispatch_permits,
            config,
        })
    }

    /// Startup recovery: roll prompts stranded in `assigned` back to
    /// `pending`, and expire pre-start locks whose owner is not visibly
    /// mid-prompt. Returns the number of repairs.
    pub fn recover(&self) -> crate::error::Result<usize> {
        let mut repairs = 0;
        for id in self.store.assigned_prompt_ids()? {
            let rolled = self.store.transition(
                id,
                &[PromptState::Assigned],
                &Transition::to(PromptState::Pending),
            );
            if rolled.is_ok() {
                let _ = self.store.log_assignment(id, "", AssignmentAction::Requeued, "daemon restart");
                repairs += 1;
            }
        }
        repairs += self.store.expire_locks_created_before(self.started_at, true)?;
        Ok(repairs)
    }
}

/// Observe every known session once per tick, bounded by a small semaphore,
/// and feed the results into the registry. Optionally discovers new panes.
pub async fn run_probe_loop(daemon: Arc<Daemon>) {
    let limit = Arc::new(Semaphore::new(PROBE_CONCURRENCY));
    let mut interval = tokio::time::interval(daemon.config.probe_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = daemon.shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        if daemon.config.discover {
            if let Err(e) = discover_panes(&daemon).await {
                debug!("pane discovery failed: {e}");
            }
        }
        // Iterate store rows rather than the cache so sessions registered by
        // other processes (the CLI) are picked up between restarts.
        let sessions = match daemon.store.list_sessions(None) {
            Ok(s) => s,
            Err(e) => {
                debug!("probe tick skipped, store unavailable: {e}");
                continue;
            }
        };
        let mut set = JoinSet::new();
        for session in sessions {
            let Ok(permit) = Arc::clone(&limit).acquire_owned().await else { break };
            let daemon = Arc::clone(&daemon);
            set.spawn(async move {
                let _permit = permit;
                let obs = daemon.probe.observe(&session.name, session.provider);
                if let Err(e) = daemon.registry.update_from_observation(&session.name, &obs).await {
                    debug!("observation of {} not applied: {e}", session.name);
                }
            });
        }
        while set.join_next().await.is_some() {}
    }
    debug!("probe loop stopped");
}

/// Register tmux panes named `<provider>_<suffix>` that are not yet known.
async fn discover_panes(daemon: &Arc<Daemon>) -> anyhow::Result<usize> {
    let mut found = 0;
    for name in daemon.probe.panes().list()? {
        if daemon.registry.get(&name).await.is_ok() {
            continue;
        }
        let Some((prefix, _)) = name.split_once('_') else { continue };
        let Ok(provider) = prefix.parse::<Provider>() else { continue };
        daemon.registry.register(&name, provider).await?;
        info!(session = %name, provider = %provider, "discovered session");
        found += 1;
    }
    Ok(found)
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / FOREMAN_LOG_LEVEL > RUST_LOG > default ("info").
    let filter = if std::env::var("FOREMAN_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Run the daemon to completion (shutdown signal or fatal error).
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);

    let sentinels = match config.sentinel_config {
        Some(ref path) => SentinelBook::load(path)?,
        None => SentinelBook::builtin(),
    };
    let store = Arc::new(Store::open(&config.db)?);
    let panes: Arc<dyn Panes> = Arc::new(TmuxPanes::new(config.tmux_socket.clone()));
    let daemon = Daemon::build(config, store, panes, sentinels);

    daemon.registry.load().await?;
    let repairs = daemon.recover()?;
    if repairs > 0 {
        info!(repairs, "recovered state from previous run");
    }

    let mut handles = crate::reconcile::spawn_all(&daemon);
    handles.push(tokio::spawn(crate::dispatch::run_loop(Arc::clone(&daemon))));
    handles.push(tokio::spawn(run_probe_loop(Arc::clone(&daemon))));

    if let Some(port) = daemon.config.port {
        let router = crate::http::build_router(Arc::clone(&daemon));
        let addr = format!("{}:{}", daemon.config.host, port);
        let listener = TcpListener::bind(&addr).await?;
        info!("HTTP listening on {}", listener.local_addr()?);
        let shutdown = daemon.shutdown.clone();
        handles.push(tokio::spawn(async move {
            let result =
                axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await;
            if let Err(e) = result {
                error!("HTTP server error: {e}");
            }
        }));
    }

    spawn_signal_handler(daemon.shutdown.clone());

    daemon.shutdown.cancelled().await;
    info!("shutting down; draining in-flight dispatches");
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

/// First SIGTERM/SIGINT: graceful shutdown. Second: force exit.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
