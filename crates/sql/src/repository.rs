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

//! Mutex owner repository contract for the relational backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use simba_core::{MutexOwner, SimbaError, SimbaResult};
use tracing::debug;

/// Table holding one row per mutex.
pub const MUTEX_TABLE: &str = "simba_mutex";

/// A mutex row as read from the store, stamped with the store's clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutexOwnerEntity {
    pub mutex: String,
    pub owner: MutexOwner,
    pub version: i64,
    /// Store time at which the row was read (ms since epoch).
    pub current_db_at: i64,
}

impl MutexOwnerEntity {
    pub fn new(mutex: impl Into<String>, owner: MutexOwner, version: i64, current_db_at: i64) -> Self {
        Self {
            mutex: mutex.into(),
            owner,
            version,
            current_db_at,
        }
    }

    pub fn owner_id(&self) -> &str {
        self.owner.owner_id()
    }

    pub fn is_owner(&self, contender_id: &str) -> bool {
        self.owner.is_owner(contender_id)
    }

    /// Held according to the store clock.
    pub fn has_owner(&self) -> bool {
        self.owner.has_owner_at(self.current_db_at)
    }

    pub fn into_owner(self) -> MutexOwner {
        self.owner
    }
}

/// What a single acquire attempt inside `acquire_and_get_owner` means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The returned owner is final.
    Settled,
    /// Nobody acquired and nobody owns: the row was just created. Try again once.
    Retry,
    /// The update succeeded yet the row names someone else.
    Inconsistent,
}

impl AcquireOutcome {
    pub fn of(acquired: bool, entity: &MutexOwnerEntity, contender_id: &str, retried: bool) -> Self {
        if acquired && !entity.is_owner(contender_id) {
            return AcquireOutcome::Inconsistent;
        }
        if !acquired && !entity.has_owner() && !retried {
            return AcquireOutcome::Retry;
        }
        AcquireOutcome::Settled
    }
}

/// Storage primitives of the relational protocol.
///
/// Every time comparison is made against the store's own clock.
#[async_trait]
pub trait MutexOwnerRepository: Send + Sync + 'static {
    /// Insert an unowned row. Fails if the row exists.
    async fn init_mutex(&self, mutex: &str) -> SimbaResult<()>;

    /// [`MutexOwnerRepository::init_mutex`] that reports failure as `false`.
    async fn try_init_mutex(&self, mutex: &str) -> bool {
        match self.init_mutex(mutex).await {
            Ok(()) => true,
            Err(e) => {
                debug!(mutex, error = %e, "tryInitMutex failed");
                false
            }
        }
    }

    /// Fails with [`SimbaError::NotFoundMutexOwner`] when the row is missing.
    async fn get_owner(&self, mutex: &str) -> SimbaResult<MutexOwnerEntity>;

    /// Like `get_owner`, creating the row first when it is missing.
    async fn ensure_owner(&self, mutex: &str) -> SimbaResult<MutexOwnerEntity> {
        match self.get_owner(mutex).await {
            Err(SimbaError::NotFoundMutexOwner(_)) => {
                self.try_init_mutex(mutex).await;
                self.get_owner(mutex).await
            }
            other => other,
        }
    }

    /// Take the mutex if it is free or renew it if `contender_id` still holds it.
    async fn acquire(&self, mutex: &str, contender_id: &str, ttl_ms: i64, transition_ms: i64) -> SimbaResult<bool>;

    /// Clear the row if `contender_id` holds it.
    async fn release(&self, mutex: &str, contender_id: &str) -> SimbaResult<bool>;

    /// Acquire then read the owner in one transaction, retrying once on the
    /// fresh-row race.
    async fn acquire_and_get_owner(
        &self,
        mutex: &str,
        contender_id: &str,
        ttl_ms: i64,
        transition_ms: i64,
    ) -> SimbaResult<MutexOwnerEntity>;
}

pub(crate) fn inconsistent(mutex: &str, contender_id: &str) -> SimbaError {
    SimbaError::InconsistentOwner {
        mutex: mutex.to_string(),
        contender_id: contender_id.to_string(),
    }
}
