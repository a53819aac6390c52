// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `foreman` binary as a subprocess with an isolated database
//! and exercises it over HTTP.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Resolve the path to the compiled `foreman` binary.
pub fn foreman_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("foreman")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `foreman` daemon that is killed on drop.
pub struct ForemanProcess {
    child: Child,
    port: u16,
    state_dir: tempfile::TempDir,
}

impl ForemanProcess {
    /// Spawn the daemon with an isolated database and a fresh port.
    pub fn start() -> anyhow::Result<Self> {
        let binary = foreman_binary();
        anyhow::ensure!(binary.exists(), "foreman binary not found at {}", binary.display());

        let state_dir = tempfile::tempdir()?;
        let port = free_port()?;
        let db = state_dir.path().join("foreman.db");

        let child = Command::new(&binary)
            .args([
                "--db",
                &db.to_string_lossy(),
                "--port",
                &port.to_string(),
                "--host",
                "127.0.0.1",
                "--log-format",
                "text",
                "--log-level",
                "warn",
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, port, state_dir })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path of the daemon's database, for CLI subcommand tests.
    pub fn db_path(&self) -> PathBuf {
        self.state_dir.path().join("foreman.db")
    }

    /// Base URL for HTTP requests.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Poll health until responsive.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("foreman did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Run a `foreman` CLI subcommand against this daemon's database.
    pub fn cli(&self, args: &[&str]) -> anyhow::Result<String> {
        let output = Command::new(foreman_binary())
            .arg("--db")
            .arg(self.db_path())
            .args(args)
            .output()?;
        anyhow::ensure!(
            output.status.success(),
            "foreman {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Drop for ForemanProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
