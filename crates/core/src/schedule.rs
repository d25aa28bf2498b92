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

//! Periodic work that runs only while a mutex is held.

use crate::contender::MutexContender;
use crate::error::{SimbaError, SimbaResult};
use crate::id::{ContenderIdGenerator, HostContenderIdGenerator};
use crate::service::{ContendService, MutexContendServiceFactory};
use crate::state::MutexState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{error, info, warn};

/// How consecutive runs are spaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleStrategy {
    /// `period` measured from the end of the previous run.
    FixedDelay,
    /// `period` measured from the start of the previous run.
    FixedRate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub strategy: ScheduleStrategy,
    pub initial_delay: Duration,
    pub period: Duration,
}

impl ScheduleConfig {
    pub fn rate(initial_delay: Duration, period: Duration) -> Self {
        Self {
            strategy: ScheduleStrategy::FixedRate,
            initial_delay,
            period,
        }
    }

    pub fn delay(initial_delay: Duration, period: Duration) -> Self {
        Self {
            strategy: ScheduleStrategy::FixedDelay,
            initial_delay,
            period,
        }
    }

    pub fn validate(&self) -> SimbaResult<()> {
        if self.period.is_zero() {
            return Err(SimbaError::InvalidArgument("period must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// The job run by a [`MutexScheduler`].
#[async_trait]
pub trait ScheduledWork: Send + Sync + 'static {
    /// Name used in logs.
    fn worker(&self) -> &str;

    async fn work(&self) -> anyhow::Result<()>;
}

struct WorkContender {
    mutex: String,
    contender_id: String,
    config: ScheduleConfig,
    work: Arc<dyn ScheduledWork>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WorkContender {
    fn cancel_work(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl MutexContender for WorkContender {
    fn mutex(&self) -> &str {
        &self.mutex
    }

    fn contender_id(&self) -> &str {
        &self.contender_id
    }

    fn on_acquired(&self, _state: MutexState) {
        info!("Worker {} acquired mutex {}, scheduling work", self.work.worker(), self.mutex);
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(worker = %self.work.worker(), "no runtime available to schedule work");
            return;
        };
        let work = self.work.clone();
        let config = self.config.clone();
        *task = Some(runtime.spawn(run_schedule(work, config)));
    }

    fn on_released(&self, _state: MutexState) {
        info!("Worker {} released mutex {}, cancelling work", self.work.worker(), self.mutex);
        self.cancel_work();
    }
}

impl Drop for WorkContender {
    fn drop(&mut self) {
        self.cancel_work();
    }
}

async fn run_schedule(work: Arc<dyn ScheduledWork>, config: ScheduleConfig) {
    match config.strategy {
        ScheduleStrategy::FixedRate => {
            let mut ticker = interval_at(Instant::now() + config.initial_delay, config.period);
            loop {
                ticker.tick().await;
                safe_work(work.as_ref()).await;
            }
        }
        ScheduleStrategy::FixedDelay => {
            sleep(config.initial_delay).await;
            loop {
                safe_work(work.as_ref()).await;
                sleep(config.period).await;
            }
        }
    }
}

async fn safe_work(work: &dyn ScheduledWork) {
    metrics::counter!("simba_schedule_runs_total").increment(1);
    if let Err(e) = work.work().await {
        warn!(worker = %work.worker(), error = %e, "scheduled work failed");
    }
}

/// Runs [`ScheduledWork`] on the configured schedule while its mutex is owned.
pub struct MutexScheduler {
    service: ContendService,
}

impl MutexScheduler {
    pub fn new(
        mutex: impl Into<String>,
        config: ScheduleConfig,
        work: Arc<dyn ScheduledWork>,
        factory: &dyn MutexContendServiceFactory,
    ) -> SimbaResult<Self> {
        config.validate()?;
        let contender = WorkContender {
            mutex: mutex.into(),
            contender_id: HostContenderIdGenerator::shared().generate()?,
            config,
            work,
            task: Mutex::new(None),
        };
        let service = factory.create_mutex_contend_service(Arc::new(contender))?;
        Ok(Self { service })
    }

    pub async fn start(&self) -> SimbaResult<()> {
        self.service.start().await
    }

    pub async fn stop(&self) -> SimbaResult<()> {
        self.service.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.service.is_running()
    }

    /// Whether this scheduler currently holds the mutex.
    pub fn is_owner(&self) -> bool {
        self.service.is_owner()
    }

    pub fn mutex(&self) -> &str {
        self.service.mutex()
    }
}
