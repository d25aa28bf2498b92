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

//! Blocking lock on top of a contend service.
//!
//! [`SimbaLocker`] turns the asynchronous "acquired" notification into an
//! awaitable `acquire()`. One task at a time may wait on a given locker.
//!
//! ```rust,no_run
//! use simba_core::{MutexContendServiceFactory, SimbaLocker};
//! use std::time::Duration;
//!
//! # async fn example(factory: &dyn MutexContendServiceFactory) -> simba_core::SimbaResult<()> {
//! let locker = SimbaLocker::new("orders", factory)?;
//! locker.acquire_timeout(Duration::from_secs(5)).await?;
//! // critical section
//! locker.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::contender::MutexContender;
use crate::error::{SimbaError, SimbaResult};
use crate::id::{ContenderIdGenerator, HostContenderIdGenerator};
use crate::service::{ContendService, MutexContendServiceFactory};
use crate::state::MutexState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

struct LockerContender {
    mutex: String,
    contender_id: String,
    acquired: Arc<Notify>,
}

impl MutexContender for LockerContender {
    fn mutex(&self) -> &str {
        &self.mutex
    }

    fn contender_id(&self) -> &str {
        &self.contender_id
    }

    fn on_acquired(&self, state: MutexState) {
        info!(mutex = %self.mutex, contender_id = %self.contender_id, acquired_at = state.after().acquired_at(), "locker acquired");
        self.acquired.notify_one();
    }
}

/// Mutex held as a lock.
pub struct SimbaLocker {
    service: ContendService,
    acquired: Arc<Notify>,
    parked: AtomicBool,
}

impl SimbaLocker {
    /// Locker with a generated contender id.
    pub fn new(mutex: impl Into<String>, factory: &dyn MutexContendServiceFactory) -> SimbaResult<Self> {
        let contender_id = HostContenderIdGenerator::shared().generate()?;
        Self::with_contender_id(mutex, contender_id, factory)
    }

    pub fn with_contender_id(
        mutex: impl Into<String>,
        contender_id: impl Into<String>,
        factory: &dyn MutexContendServiceFactory,
    ) -> SimbaResult<Self> {
        let acquired = Arc::new(Notify::new());
        let contender = LockerContender {
            mutex: mutex.into(),
            contender_id: contender_id.into(),
            acquired: acquired.clone(),
        };
        let service = factory.create_mutex_contend_service(Arc::new(contender))?;
        Ok(Self {
            service,
            acquired,
            parked: AtomicBool::new(false),
        })
    }

    pub fn mutex(&self) -> &str {
        self.service.mutex()
    }

    pub fn contender_id(&self) -> &str {
        self.service.contender_id()
    }

    pub fn is_owner(&self) -> bool {
        self.service.is_owner()
    }

    /// Waits until this locker owns the mutex.
    pub async fn acquire(&self) -> SimbaResult<()> {
        self.park()?;
        self.service.start().await?;
        self.wait_owner().await;
        Ok(())
    }

    /// Like [`SimbaLocker::acquire`] but gives up after `timeout`.
    ///
    /// On timeout the contention keeps running until [`SimbaLocker::close`].
    pub async fn acquire_timeout(&self, timeout: Duration) -> SimbaResult<()> {
        self.park()?;
        self.service.start().await?;
        let _ = tokio::time::timeout(timeout, self.wait_owner()).await;
        if !self.service.is_owner() {
            return Err(SimbaError::Timeout {
                contender_id: self.contender_id().to_string(),
                mutex: self.mutex().to_string(),
                timeout,
            });
        }
        Ok(())
    }

    /// Stops contending and releases the mutex. Safe to call twice.
    pub async fn close(&self) -> SimbaResult<()> {
        self.service.stop().await?;
        self.parked.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn park(&self) -> SimbaResult<()> {
        if self
            .parked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SimbaError::IllegalMonitorState(format!(
                "A task already owns this lock[{}].",
                self.mutex()
            )));
        }
        Ok(())
    }

    async fn wait_owner(&self) {
        while !self.service.is_owner() {
            self.acquired.notified().await;
        }
    }
}

impl Drop for SimbaLocker {
    fn drop(&mut self) {
        if !self.service.is_running() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let service = self.service.clone();
            debug!(mutex = %service.mutex(), "stopping locker on drop");
            handle.spawn(async move { service.stop().await });
        }
    }
}
