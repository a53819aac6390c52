// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `foreman` binary and exercise
//! the HTTP API plus the CLI subcommands over a shared database.

use std::time::Duration;

use foreman_specs::ForemanProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let foreman = ForemanProcess::start()?;
    foreman.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/health", foreman.base_url())).await?.json().await?;

    assert_eq!(resp["status"], "running");
    assert!(resp["uptime_ms"].is_number());
    assert!(resp["pid"].is_number());
    Ok(())
}

#[tokio::test]
async fn http_submit_get_cancel() -> anyhow::Result<()> {
    let foreman = ForemanProcess::start()?;
    foreman.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let resp: serde_json::Value = client
        .post(format!("{}/api/v1/prompts", foreman.base_url()))
        .json(&serde_json::json!({ "content": "hello", "priority": 1 }))
        .send()
        .await?
        .json()
        .await?;
    let id = resp["id"].as_i64().ok_or_else(|| anyhow::anyhow!("no id in {resp}"))?;

    let resp: serde_json::Value = client
        .get(format!("{}/api/v1/prompts/{id}", foreman.base_url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["prompt"]["status"], "pending");
    assert_eq!(resp["prompt"]["content"], "hello");

    let resp: serde_json::Value = client
        .post(format!("{}/api/v1/prompts/{id}/cancel", foreman.base_url()))
        .json(&serde_json::json!({}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["outcome"], "cancelled");
    Ok(())
}

#[tokio::test]
async fn http_rejects_bad_submissions() -> anyhow::Result<()> {
    let foreman = ForemanProcess::start()?;
    foreman.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/prompts", foreman.base_url()))
        .json(&serde_json::json!({ "content": "" }))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 400);

    let resp = client
        .post(format!("{}/api/v1/prompts", foreman.base_url()))
        .json(&serde_json::json!({ "content": "x", "priority": 99 }))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 400);
    Ok(())
}

#[tokio::test]
async fn cli_submissions_are_visible_over_http() -> anyhow::Result<()> {
    let foreman = ForemanProcess::start()?;
    foreman.wait_healthy(TIMEOUT).await?;

    let out = foreman.cli(&["submit", "run the tests", "--priority", "3"])?;
    let parsed: serde_json::Value = serde_json::from_str(&out)?;
    let id = parsed["id"].as_i64().ok_or_else(|| anyhow::anyhow!("no id in {out}"))?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/prompts/{id}", foreman.base_url())).await?.json().await?;
    assert_eq!(resp["prompt"]["content"], "run the tests");
    assert_eq!(resp["prompt"]["priority"], 3);

    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/stats", foreman.base_url())).await?.json().await?;
    assert_eq!(resp["stats"]["pending"], 1);
    Ok(())
}

#[tokio::test]
async fn sessions_register_and_list() -> anyhow::Result<()> {
    let foreman = ForemanProcess::start()?;
    foreman.wait_healthy(TIMEOUT).await?;

    foreman.cli(&["register", "claude_1", "--provider", "claude"])?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/sessions", foreman.base_url())).await?.json().await?;
    assert_eq!(resp["sessions"][0]["name"], "claude_1");
    assert_eq!(resp["sessions"][0]["provider"], "claude");

    // With no matching tmux pane the probe reports the session offline.
    let store = foreman::store::Store::open(&foreman.db_path())?;
    assert!(!store.list_sessions(None)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn submissions_with_no_sessions_stay_pending() -> anyhow::Result<()> {
    let foreman = ForemanProcess::start()?;
    foreman.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    for content in ["a", "b", "c"] {
        let resp = client
            .post(format!("{}/api/v1/prompts", foreman.base_url()))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;
        assert!(resp.status().is_success());
    }

    // A few dispatch ticks later nothing has moved: no sessions, no churn.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/stats", foreman.base_url())).await?.json().await?;
    assert_eq!(resp["stats"]["pending"], 3);
    assert_eq!(resp["stats"]["in_progress"], 0);
    assert_eq!(resp["stats"]["failed"], 0);
    Ok(())
}
