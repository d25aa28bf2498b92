// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of Simba.
//
// Simba is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// Simba is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with Simba. If not, see <https://www.gnu.org/licenses/>.

//! Error types for mutex contention.
//!
//! Every failure surfaced by the engine or a backend is a [`SimbaError`], so
//! callers can handle them uniformly.

use std::time::Duration;
use thiserror::Error;

/// Result type for mutex operations.
pub type SimbaResult<T> = Result<T, SimbaError>;

/// Errors that can occur while contending for, observing or holding a mutex.
#[derive(Error, Debug)]
pub enum SimbaError {
    /// Backend error (database, network, script execution, etc.)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Mutex row/key has not been initialized
    #[error("No mutex:[{0}] is found, initialize it first")]
    NotFoundMutexOwner(String),

    /// Backend reported acquisition but the stored owner disagrees
    #[error("Contender:[{contender_id}] has acquired mutex:[{mutex}], but the owner state is inconsistent")]
    InconsistentOwner {
        /// Mutex name
        mutex: String,
        /// Contender that believed it acquired
        contender_id: String,
    },

    /// Precondition failure (blank mutex, blank contender id, bad duration)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Concurrent acquire on a locker that already has a parked caller
    #[error("Illegal monitor state: {0}")]
    IllegalMonitorState(String),

    /// Malformed payload or unexpected protocol state
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Blocking acquire did not win the mutex in time
    #[error("Could not acquire [{contender_id}]@mutex:[{mutex}] within timeout of {}ms", timeout.as_millis())]
    Timeout {
        /// Contender that timed out
        contender_id: String,
        /// Mutex name
        mutex: String,
        /// Requested timeout
        timeout: Duration,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SimbaError {
    /// Returns true for errors raised by the backing store.
    pub fn is_backend(&self) -> bool {
        matches!(self, SimbaError::Backend(_))
    }
}

/// Fails with [`SimbaError::InvalidArgument`] when `value` is blank.
pub fn require_not_blank(value: &str, name: &str) -> SimbaResult<()> {
    if value.trim().is_empty() {
        return Err(SimbaError::InvalidArgument(format!("{name} must not be blank!")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_contender_and_mutex() {
        let err = SimbaError::Timeout {
            contender_id: "c-2".to_string(),
            mutex: "orders".to_string(),
            timeout: Duration::from_millis(250),
        };
        let msg = err.to_string();
        assert!(msg.contains("c-2"));
        assert!(msg.contains("orders"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn test_require_not_blank() {
        assert!(require_not_blank("m", "mutex").is_ok());
        assert!(matches!(require_not_blank("  ", "mutex"), Err(SimbaError::InvalidArgument(_))));
    }
}
