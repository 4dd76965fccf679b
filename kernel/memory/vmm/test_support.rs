// Copyright 2024 The Mayfly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Shared plumbing for the crate's tests.

use std::sync::{Mutex, MutexGuard, PoisonError};

// Serialises the tests that consume the process-wide reservation
// cursor, so one test's reservations cannot appear in another's
// view of the cursor mid-flight.
static CURSOR_TESTS: Mutex<()> = Mutex::new(());

/// Takes the lock shared by every test that touches the global
/// early-reserve cursor.
///
pub(crate) fn cursor_lock() -> MutexGuard<'static, ()> {
    CURSOR_TESTS.lock().unwrap_or_else(PoisonError::into_inner)
}
