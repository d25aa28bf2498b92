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

//! Wire formats of the key-value protocol.
//!
//! - Script results: `ownerId@@remainingTtlMs`, or `@@` alone for "no owner".
//! - Pub/sub messages: `acquired@@ownerId` / `released@@ownerId`.
//! - Key `{mutex}`, broadcast channel `simba:{mutex}`, personal channel
//!   `simba:{mutex}:{contenderId}`.

use simba_core::{current_millis, SimbaError, SimbaResult, NONE_OWNER_ID, SIMBA};
use std::fmt;
use std::str::FromStr;

pub const DELIMITER: &str = "@@";

/// Hash-tagged key holding the owner id.
pub fn mutex_key(mutex: &str) -> String {
    format!("{{{mutex}}}")
}

/// Channel carrying owner-change broadcasts for a mutex.
pub fn mutex_channel(mutex: &str) -> String {
    format!("{SIMBA}:{}", mutex_key(mutex))
}

/// Channel on which a waiting contender is woken after a release.
pub fn contender_channel(mutex: &str, contender_id: &str) -> String {
    format!("{}:{contender_id}", mutex_channel(mutex))
}

/// Outcome of an acquire, guard or inspect script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireResult {
    owner_id: String,
    remaining_ms: i64,
}

impl AcquireResult {
    pub const NONE: AcquireResult = AcquireResult {
        owner_id: String::new(),
        remaining_ms: 0,
    };

    pub fn new(owner_id: impl Into<String>, remaining_ms: i64) -> Self {
        Self {
            owner_id: owner_id.into(),
            remaining_ms,
        }
    }

    /// Parse a script result.
    pub fn of(raw: &str) -> SimbaResult<Self> {
        if raw == DELIMITER {
            return Ok(Self::NONE);
        }
        let parts: Vec<&str> = raw.split(DELIMITER).collect();
        if parts.len() != 2 {
            return Err(SimbaError::IllegalState(format!("Incorrect resultStr format:[{raw}]")));
        }
        let remaining_ms = parts[1]
            .parse::<i64>()
            .map_err(|_| SimbaError::IllegalState(format!("Incorrect resultStr format:[{raw}]")))?;
        Ok(Self::new(parts[0], remaining_ms))
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn remaining_ms(&self) -> i64 {
        self.remaining_ms
    }

    pub fn is_none(&self) -> bool {
        self.owner_id == NONE_OWNER_ID
    }

    /// End of the owner's transition window, given the time the result was read.
    pub fn transition_at(&self, now: i64) -> i64 {
        now + self.remaining_ms
    }
}

impl fmt::Display for AcquireResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NONE {
            return f.write_str(DELIMITER);
        }
        write!(f, "{}{DELIMITER}{}", self.owner_id, self.remaining_ms)
    }
}

impl FromStr for AcquireResult {
    type Err = SimbaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::of(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerEventKind {
    Acquired,
    Released,
}

impl OwnerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerEventKind::Acquired => "acquired",
            OwnerEventKind::Released => "released",
        }
    }
}

/// A pub/sub message, stamped with its local receipt time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerEvent {
    pub kind: OwnerEventKind,
    pub owner_id: String,
    pub event_at: i64,
}

impl OwnerEvent {
    pub fn of(message: &str) -> SimbaResult<Self> {
        Self::of_at(message, current_millis())
    }

    pub fn of_at(message: &str, event_at: i64) -> SimbaResult<Self> {
        let malformed = || SimbaError::IllegalState(format!("Incorrect message format:[{message}]"));
        let (event, owner_id) = message.split_once(DELIMITER).ok_or_else(malformed)?;
        if owner_id.contains(DELIMITER) {
            return Err(malformed());
        }
        let kind = match event {
            "acquired" => OwnerEventKind::Acquired,
            "released" => OwnerEventKind::Released,
            other => return Err(SimbaError::IllegalState(format!("Unexpected value: {other}"))),
        };
        Ok(Self {
            kind,
            owner_id: owner_id.to_string(),
            event_at,
        })
    }

    /// Message body for `kind` about `owner_id`.
    pub fn message(kind: OwnerEventKind, owner_id: &str) -> String {
        format!("{}{DELIMITER}{owner_id}", kind.as_str())
    }
}
