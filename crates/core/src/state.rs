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

//! Owner transitions.

use crate::owner::MutexOwner;
use serde::{Deserialize, Serialize};

/// A `(before, after)` pair of owners observed by one contender.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MutexState {
    before: MutexOwner,
    after: MutexOwner,
}

impl MutexState {
    /// `(NONE, NONE)`
    pub const NONE: MutexState = MutexState {
        before: MutexOwner::NONE,
        after: MutexOwner::NONE,
    };

    pub fn new(before: MutexOwner, after: MutexOwner) -> Self {
        Self { before, after }
    }

    pub fn before(&self) -> &MutexOwner {
        &self.before
    }

    pub fn after(&self) -> &MutexOwner {
        &self.after
    }

    /// Owner id differs between `before` and `after`.
    pub fn is_changed(&self) -> bool {
        self.before.owner_id() != self.after.owner_id()
    }

    pub fn is_acquired(&self, contender_id: &str) -> bool {
        self.is_changed() && self.after.is_owner(contender_id)
    }

    pub fn is_released(&self, contender_id: &str) -> bool {
        self.is_changed() && self.before.is_owner(contender_id)
    }

    pub fn is_owner(&self, contender_id: &str) -> bool {
        self.after.is_owner(contender_id)
    }

    pub fn is_in_ttl(&self, contender_id: &str) -> bool {
        self.after.is_in_ttl_of(contender_id)
    }
}
