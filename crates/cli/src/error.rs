// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error codes shared by the store, the dispatcher, and the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Producer contract violation. Surfaced synchronously, never retried.
    InvalidInput,
    /// Referenced id or name does not exist.
    NotFound,
    /// Optimistic concurrency loss; the caller re-reads and decides.
    Conflict,
    /// Directory lock contended; the prompt returns to the backlog.
    Busy,
    /// The current attempt ran past its deadline.
    Timeout,
    /// A session stopped making progress while holding a prompt.
    Stuck,
    /// The store is transiently unreachable.
    StorageUnavailable,
    /// Post-preparation validation found the wrong directory or branch.
    ContextMismatch,
}

impl ErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Busy => 409,
            Self::Timeout => 408,
            Self::Stuck => 500,
            Self::StorageUnavailable => 503,
            Self::ContextMismatch => 422,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Busy => "BUSY",
            Self::Timeout => "TIMEOUT",
            Self::Stuck => "STUCK",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::ContextMismatch => "CONTEXT_MISMATCH",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain error: one of the [`ErrorKind`] codes plus a human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Busy, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageUnavailable, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => Self::not_found("row not found"),
            rusqlite::Error::SqliteFailure(code, detail)
                if code.code == rusqlite::ErrorCode::DatabaseBusy
                    || code.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                Self::storage(detail.unwrap_or_else(|| "database busy".to_owned()))
            }
            other => Self::storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
