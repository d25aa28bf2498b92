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

//! Mutex owner value object.
//!
//! ## Time windows
//! ```text
//! acquired_at ──── ttl ────► ttl_at ──── transition ────► transition_at
//!             owner holds              only the owner may renew
//! ```
//! After `transition_at` the mutex is free for anyone.

use crate::clock::current_millis;
use serde::{Deserialize, Serialize};

/// Owner id that denotes "no owner".
pub const NONE_OWNER_ID: &str = "";

/// Immutable record of the current owner of a mutex and its time windows.
///
/// All times are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutexOwner {
    owner_id: String,
    acquired_at: i64,
    ttl_at: i64,
    transition_at: i64,
}

impl MutexOwner {
    /// The "no owner" sentinel `("", 0, 0, 0)`.
    pub const NONE: MutexOwner = MutexOwner {
        owner_id: String::new(),
        acquired_at: 0,
        ttl_at: 0,
        transition_at: 0,
    };

    /// Create an owner record.
    ///
    /// Callers are expected to pass `acquired_at <= ttl_at <= transition_at`.
    pub fn new(owner_id: impl Into<String>, acquired_at: i64, ttl_at: i64, transition_at: i64) -> Self {
        debug_assert!(acquired_at <= ttl_at && ttl_at <= transition_at);
        Self {
            owner_id: owner_id.into(),
            acquired_at,
            ttl_at,
            transition_at,
        }
    }

    /// Owner whose leadership is enforced externally (session based), so its
    /// windows never lapse.
    pub fn leader(owner_id: impl Into<String>) -> Self {
        Self::new(owner_id, current_millis(), i64::MAX, i64::MAX)
    }

    /// Build an owner from the end of its transition window, as reported by
    /// stores that only track remaining lifetime.
    pub fn from_transition_at(owner_id: impl Into<String>, transition_at: i64, ttl: i64, transition: i64) -> Self {
        let ttl_at = transition_at - transition;
        let acquired_at = ttl_at - ttl;
        Self::new(owner_id, acquired_at, ttl_at, transition_at)
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn acquired_at(&self) -> i64 {
        self.acquired_at
    }

    pub fn ttl_at(&self) -> i64 {
        self.ttl_at
    }

    pub fn transition_at(&self) -> i64 {
        self.transition_at
    }

    /// Length of the transition window in milliseconds.
    pub fn transition_millis(&self) -> i64 {
        self.transition_at.saturating_sub(self.ttl_at)
    }

    /// True for the "no owner" sentinel id.
    pub fn is_none(&self) -> bool {
        self.owner_id == NONE_OWNER_ID
    }

    pub fn is_owner(&self, contender_id: &str) -> bool {
        self.owner_id == contender_id
    }

    /// `ttl_at > now`
    pub fn is_in_ttl(&self) -> bool {
        self.is_in_ttl_at(current_millis())
    }

    pub fn is_in_ttl_at(&self, now: i64) -> bool {
        self.ttl_at > now
    }

    pub fn is_in_ttl_of(&self, contender_id: &str) -> bool {
        self.is_owner(contender_id) && self.is_in_ttl()
    }

    /// `transition_at >= now`
    pub fn is_in_transition(&self) -> bool {
        self.is_in_transition_at(current_millis())
    }

    pub fn is_in_transition_at(&self, now: i64) -> bool {
        self.transition_at >= now
    }

    pub fn is_in_transition_of(&self, contender_id: &str) -> bool {
        self.is_owner(contender_id) && self.is_in_transition()
    }

    /// Whether some contender currently holds the mutex (its transition
    /// window has not lapsed).
    pub fn has_owner(&self) -> bool {
        self.is_in_transition()
    }

    pub fn has_owner_at(&self, now: i64) -> bool {
        self.is_in_transition_at(now)
    }
}

impl Default for MutexOwner {
    fn default() -> Self {
        Self::NONE
    }
}
