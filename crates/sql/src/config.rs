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

//! Relational backend configuration.

use serde::{Deserialize, Serialize};
use simba_core::{duration_millis, validate_lease, SimbaError, SimbaResult};
use std::time::Duration;

/// Timing of the relational protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlConfig {
    /// Delay before the first tick.
    pub initial_delay: Duration,
    /// Lease length granted by one acquire.
    pub ttl: Duration,
    /// Window after the TTL in which only the owner may renew.
    pub transition: Duration,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            ttl: Duration::from_secs(10),
            transition: Duration::from_secs(6),
        }
    }
}

impl SqlConfig {
    pub fn validate(&self) -> SimbaResult<()> {
        if self.ttl.is_zero() {
            return Err(SimbaError::Config("ttl must be greater than zero".to_string()));
        }
        duration_millis("initial_delay", self.initial_delay)?;
        validate_lease(self.ttl, self.transition)
    }

    pub(crate) fn ttl_ms(&self) -> i64 {
        i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    pub(crate) fn transition_ms(&self) -> i64 {
        i64::try_from(self.transition.as_millis()).unwrap_or(i64::MAX)
    }

    pub(crate) fn initial_delay_ms(&self) -> u64 {
        u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SqlConfig::default();
        assert_eq!(config.ttl_ms(), 10_000);
        assert_eq!(config.transition_ms(), 6_000);
        assert_eq!(config.initial_delay_ms(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config = SqlConfig {
            ttl: Duration::ZERO,
            ..SqlConfig::default()
        };
        assert!(matches!(config.validate(), Err(SimbaError::Config(_))));
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        let huge_ttl = SqlConfig {
            ttl: Duration::MAX,
            ..SqlConfig::default()
        };
        assert!(matches!(huge_ttl.validate(), Err(SimbaError::Config(_))));

        let huge_delay = SqlConfig {
            initial_delay: Duration::MAX,
            ..SqlConfig::default()
        };
        assert!(huge_delay.validate().unwrap_err().to_string().contains("initial_delay"));

        let overflowing_lease = SqlConfig {
            ttl: Duration::from_millis(i64::MAX as u64 / 2 + 1),
            transition: Duration::from_millis(i64::MAX as u64 / 2 + 1),
            ..SqlConfig::default()
        };
        assert!(overflowing_lease.validate().is_err());
    }
}
