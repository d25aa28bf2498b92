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

//! Wall-clock sources.
//!
//! Owner windows are absolute epoch milliseconds. The engine reads the local
//! wall clock through [`current_millis`]; backends that own a clock of their
//! own (a database server, an in-memory store in tests) take a [`Clock`].

use crate::error::{SimbaError, SimbaResult};
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Milliseconds since the UNIX epoch on the local wall clock.
pub fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// `duration` in milliseconds, rejecting values that do not fit an `i64`.
pub fn duration_millis(name: &str, duration: Duration) -> SimbaResult<i64> {
    i64::try_from(duration.as_millis())
        .map_err(|_| SimbaError::Config(format!("{name} of {duration:?} is out of range")))
}

/// Check that `ttl + transition` can be added to the current epoch time.
pub fn validate_lease(ttl: Duration, transition: Duration) -> SimbaResult<()> {
    let ttl_ms = duration_millis("ttl", ttl)?;
    let transition_ms = duration_millis("transition", transition)?;
    ttl_ms
        .checked_add(transition_ms)
        .and_then(|lease| current_millis().checked_add(lease))
        .map(|_| ())
        .ok_or_else(|| SimbaError::Config(format!("lease of {ttl:?} + {transition:?} is out of range")))
}

/// Source of epoch milliseconds.
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_millis(&self) -> i64;
}

/// Local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        current_millis()
    }
}

/// Manually driven clock, for deterministic expiry in tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `now` epoch milliseconds.
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Move the clock forward by `millis`.
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn test_lease_range() {
        assert_eq!(duration_millis("ttl", Duration::from_secs(2)).unwrap(), 2_000);
        assert!(validate_lease(Duration::from_secs(10), Duration::from_secs(6)).is_ok());

        let err = duration_millis("ttl", Duration::MAX).unwrap_err();
        assert!(err.to_string().contains("ttl"));
        let near_max = Duration::from_millis(i64::MAX as u64 - 1);
        assert!(matches!(
            validate_lease(near_max, Duration::ZERO),
            Err(SimbaError::Config(_))
        ));
        assert!(validate_lease(Duration::from_secs(1), Duration::MAX).is_err());
    }

    #[test]
    fn test_system_clock_is_epoch_millis() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
