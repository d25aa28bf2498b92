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

//! In-memory mutex owner repository.
//!
//! Mirrors the SQL statements row-for-row, with an injectable clock standing
//! in for the database server clock. Used for single-process setups and for
//! tests that need to move server time by hand.

use crate::repository::{inconsistent, AcquireOutcome, MutexOwnerEntity, MutexOwnerRepository};
use async_trait::async_trait;
use simba_core::{Clock, MutexOwner, SimbaError, SimbaResult, SystemClock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Row {
    owner: MutexOwner,
    version: i64,
}

impl Row {
    fn unowned() -> Self {
        Self {
            owner: MutexOwner::NONE,
            version: 0,
        }
    }
}

/// HashMap-backed repository.
#[derive(Clone)]
pub struct MemoryMutexOwnerRepository {
    rows: Arc<Mutex<HashMap<String, Row>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryMutexOwnerRepository {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Repository whose "server time" comes from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    fn entity(&self, mutex: &str, row: &Row) -> MutexOwnerEntity {
        MutexOwnerEntity::new(mutex, row.owner.clone(), row.version, self.clock.now_millis())
    }

    fn acquire_row(&self, rows: &mut HashMap<String, Row>, mutex: &str, contender_id: &str, ttl_ms: i64, transition_ms: i64) -> bool {
        let now = self.clock.now_millis();
        let Some(row) = rows.get_mut(mutex) else {
            return false;
        };
        let transition_at = row.owner.transition_at();
        let free = transition_at < now;
        let renewing = row.owner.is_owner(contender_id) && transition_at > now;
        if !(free || renewing) {
            return false;
        }
        row.owner = MutexOwner::new(contender_id, now, now + ttl_ms, now + ttl_ms + transition_ms);
        row.version += 1;
        true
    }

    fn ensure_row(&self, rows: &mut HashMap<String, Row>, mutex: &str) -> MutexOwnerEntity {
        let row = rows.entry(mutex.to_string()).or_insert_with(Row::unowned);
        self.entity(mutex, row)
    }
}

impl Default for MemoryMutexOwnerRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MutexOwnerRepository for MemoryMutexOwnerRepository {
    async fn init_mutex(&self, mutex: &str) -> SimbaResult<()> {
        let mut rows = self.rows.lock().await;
        if rows.contains_key(mutex) {
            return Err(SimbaError::Backend(format!("duplicate key: mutex [{mutex}] already initialized")));
        }
        rows.insert(mutex.to_string(), Row::unowned());
        Ok(())
    }

    async fn get_owner(&self, mutex: &str) -> SimbaResult<MutexOwnerEntity> {
        let rows = self.rows.lock().await;
        rows.get(mutex)
            .map(|row| self.entity(mutex, row))
            .ok_or_else(|| SimbaError::NotFoundMutexOwner(mutex.to_string()))
    }

    async fn acquire(&self, mutex: &str, contender_id: &str, ttl_ms: i64, transition_ms: i64) -> SimbaResult<bool> {
        let mut rows = self.rows.lock().await;
        Ok(self.acquire_row(&mut rows, mutex, contender_id, ttl_ms, transition_ms))
    }

    async fn release(&self, mutex: &str, contender_id: &str) -> SimbaResult<bool> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(mutex) {
            Some(row) if row.owner.is_owner(contender_id) => {
                row.owner = MutexOwner::NONE;
                row.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn acquire_and_get_owner(
        &self,
        mutex: &str,
        contender_id: &str,
        ttl_ms: i64,
        transition_ms: i64,
    ) -> SimbaResult<MutexOwnerEntity> {
        let mut rows = self.rows.lock().await;
        let snapshot = rows.get(mutex).cloned();
        let mut retried = false;
        loop {
            let acquired = self.acquire_row(&mut rows, mutex, contender_id, ttl_ms, transition_ms);
            let entity = self.ensure_row(&mut rows, mutex);
            match AcquireOutcome::of(acquired, &entity, contender_id, retried) {
                AcquireOutcome::Settled => return Ok(entity),
                AcquireOutcome::Retry => retried = true,
                AcquireOutcome::Inconsistent => {
                    match snapshot {
                        Some(row) => rows.insert(mutex.to_string(), row),
                        None => rows.remove(mutex),
                    };
                    return Err(inconsistent(mutex, contender_id));
                }
            }
        }
    }
}
