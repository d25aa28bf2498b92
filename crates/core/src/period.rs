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

//! Contention period policy.

use crate::clock::current_millis;
use crate::owner::MutexOwner;
use rand::Rng;

/// Upper bound (exclusive) of the challenger jitter, in milliseconds.
pub const CONTENDER_JITTER_MAX: i64 = 1_000;
/// Lower bound of the challenger jitter when a transition window exists.
pub const CONTENDER_JITTER_MIN: i64 = -200;

/// Computes how long a contender waits before its next tick.
#[derive(Debug, Clone)]
pub struct ContendPeriod {
    contender_id: String,
}

impl ContendPeriod {
    pub fn new(contender_id: impl Into<String>) -> Self {
        Self {
            contender_id: contender_id.into(),
        }
    }

    /// [`next_delay`](Self::next_delay) clamped to `>= 0`.
    pub fn ensure_next_delay(&self, owner: &MutexOwner) -> u64 {
        clamp(self.next_delay(owner))
    }

    /// Owner renews at its `ttl_at`; everyone else challenges after the
    /// transition window with jitter.
    pub fn next_delay(&self, owner: &MutexOwner) -> i64 {
        if owner.is_owner(&self.contender_id) {
            Self::next_owner_delay(owner)
        } else {
            Self::next_contender_delay(owner)
        }
    }

    pub fn next_owner_delay(owner: &MutexOwner) -> i64 {
        owner.ttl_at().saturating_sub(current_millis())
    }

    /// `(transition_at - now) + rand[min, 1000)` with `min = 0` when the
    /// owner has no transition window, `-200` otherwise.
    pub fn next_contender_delay(owner: &MutexOwner) -> i64 {
        let min = if owner.transition_millis() == 0 { 0 } else { CONTENDER_JITTER_MIN };
        let jitter = rand::thread_rng().gen_range(min..CONTENDER_JITTER_MAX);
        owner
            .transition_at()
            .saturating_sub(current_millis())
            .saturating_add(jitter)
    }

    /// Challenger delay clamped to `>= 0`, for observers.
    pub fn ensure_next_contender_delay(owner: &MutexOwner) -> u64 {
        clamp(Self::next_contender_delay(owner))
    }
}

fn clamp(delay: i64) -> u64 {
    u64::try_from(delay).unwrap_or(0)
}
