// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use yare::parameterized;

use super::{Error, ErrorKind};

#[parameterized(
    invalid_input = { ErrorKind::InvalidInput, 400 },
    not_found = { ErrorKind::NotFound, 404 },
    conflict = { ErrorKind::Conflict, 409 },
    busy = { ErrorKind::Busy, 409 },
    timeout = { ErrorKind::Timeout, 408 },
    stuck = { ErrorKind::Stuck, 500 },
    storage = { ErrorKind::StorageUnavailable, 503 },
    context = { ErrorKind::ContextMismatch, 422 },
)]
fn http_status_mapping(kind: ErrorKind, status: u16) {
    assert_eq!(kind.http_status(), status);
}

#[test]
fn display_includes_code_and_detail() {
    let e = Error::not_found("prompt 42");
    assert_eq!(e.to_string(), "NOT_FOUND: prompt 42");
    assert_eq!(e.kind(), ErrorKind::NotFound);
    assert_eq!(e.message(), "prompt 42");
}

#[test]
fn no_rows_maps_to_not_found() {
    let e: Error = rusqlite::Error::QueryReturnedNoRows.into();
    assert_eq!(e.kind(), ErrorKind::NotFound);
}
