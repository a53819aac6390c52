// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry driver: requeues failed prompts whose backoff deadline elapsed.

use tracing::info;

use crate::error::ErrorKind;
use crate::run::Daemon;

/// One pass over failed prompts. Returns the number requeued.
pub fn drive(daemon: &Daemon, now_ms: u64) -> crate::error::Result<usize> {
    let mut requeued = 0;
    for prompt in daemon.store.list_failed_retryable()? {
        if !daemon.queue.retry_due(&prompt, now_ms) {
            continue;
        }
        match daemon.queue.requeue(prompt.id, "automatic retry") {
            Ok(()) => {
                info!(
                    prompt = prompt.id,
                    attempt = prompt.retry_count + 1,
                    of = prompt.max_retries,
                    "retrying failed prompt"
                );
                requeued += 1;
            }
            // Lost a race with an operator retry; nothing to do.
            Err(e) if e.kind() == ErrorKind::Conflict => {}
            Err(e) => return Err(e),
        }
    }
    Ok(requeued)
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
