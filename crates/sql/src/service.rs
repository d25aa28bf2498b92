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

//! Timer loops of the relational backend.

use crate::config::SqlConfig;
use crate::repository::MutexOwnerRepository;
use async_trait::async_trait;
use simba_core::{
    ContendContext, ContendDriver, ContendPeriod, ContendService, HandlerExecutor, MutexContendServiceFactory,
    MutexContender, MutexRetrievalServiceFactory, MutexRetriever, RetrievalDriver, RetrievalService, SimbaResult,
};
use std::sync::Arc;
use tracing::{debug, warn};

const BACKEND: &str = "sql";

/// Contends by calling `acquire_and_get_owner` on every tick.
pub struct SqlContendDriver {
    repository: Arc<dyn MutexOwnerRepository>,
    config: SqlConfig,
}

impl SqlContendDriver {
    pub fn new(repository: Arc<dyn MutexOwnerRepository>, config: SqlConfig) -> Self {
        Self { repository, config }
    }
}

#[async_trait]
impl ContendDriver for SqlContendDriver {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn run_contend(&self, ctx: ContendContext) {
        let period = ContendPeriod::new(ctx.contender_id());
        let mut next_delay = self.config.initial_delay_ms();
        loop {
            debug!(mutex = %ctx.mutex(), contender_id = %ctx.contender_id(), next_delay, "nextSchedule");
            if !ctx.sleep(next_delay).await {
                return;
            }
            metrics::counter!("simba_ticks_total", "backend" => BACKEND).increment(1);
            let result = self
                .repository
                .acquire_and_get_owner(
                    ctx.mutex(),
                    ctx.contender_id(),
                    self.config.ttl_ms(),
                    self.config.transition_ms(),
                )
                .await;
            next_delay = match result {
                Ok(entity) => {
                    let owner = entity.into_owner();
                    let next_delay = period.ensure_next_delay(&owner);
                    ctx.notify_owner(owner);
                    next_delay
                }
                Err(e) => {
                    metrics::counter!("simba_backend_errors_total", "backend" => BACKEND).increment(1);
                    warn!(mutex = %ctx.mutex(), contender_id = %ctx.contender_id(), error = %e, "safeHandleContend failed");
                    self.config.ttl_ms() as u64
                }
            };
        }
    }

    async fn stop_contend(&self, ctx: &ContendContext) -> SimbaResult<()> {
        let released = self.repository.release(ctx.mutex(), ctx.contender_id()).await?;
        if released {
            metrics::counter!("simba_release_total", "backend" => BACKEND).increment(1);
        }
        debug!(mutex = %ctx.mutex(), contender_id = %ctx.contender_id(), released, "stopContend");
        Ok(())
    }
}

/// Polls the owner row without contending.
pub struct SqlRetrievalDriver {
    repository: Arc<dyn MutexOwnerRepository>,
    config: SqlConfig,
}

impl SqlRetrievalDriver {
    pub fn new(repository: Arc<dyn MutexOwnerRepository>, config: SqlConfig) -> Self {
        Self { repository, config }
    }
}

#[async_trait]
impl RetrievalDriver for SqlRetrievalDriver {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn run_retrieval(&self, ctx: ContendContext) {
        let mut next_delay = self.config.initial_delay_ms();
        loop {
            if !ctx.sleep(next_delay).await {
                return;
            }
            next_delay = match self.repository.ensure_owner(ctx.mutex()).await {
                Ok(entity) => {
                    let owner = entity.into_owner();
                    let next_delay = ContendPeriod::ensure_next_contender_delay(&owner);
                    ctx.notify_owner(owner);
                    next_delay
                }
                Err(e) => {
                    metrics::counter!("simba_backend_errors_total", "backend" => BACKEND).increment(1);
                    warn!(mutex = %ctx.mutex(), error = %e, "safeRetrieval failed");
                    self.config.ttl_ms() as u64
                }
            };
        }
    }
}

/// Builds relational contend and retrieval services over one repository.
#[derive(Clone)]
pub struct SqlContendServiceFactory {
    repository: Arc<dyn MutexOwnerRepository>,
    config: SqlConfig,
    executor: HandlerExecutor,
}

impl SqlContendServiceFactory {
    pub fn new(repository: Arc<dyn MutexOwnerRepository>, config: SqlConfig) -> SimbaResult<Self> {
        Self::with_executor(repository, config, HandlerExecutor::ambient())
    }

    pub fn with_executor(
        repository: Arc<dyn MutexOwnerRepository>,
        config: SqlConfig,
        executor: HandlerExecutor,
    ) -> SimbaResult<Self> {
        config.validate()?;
        Ok(Self {
            repository,
            config,
            executor,
        })
    }

    pub fn repository(&self) -> &Arc<dyn MutexOwnerRepository> {
        &self.repository
    }
}

impl MutexContendServiceFactory for SqlContendServiceFactory {
    fn create_mutex_contend_service(&self, contender: Arc<dyn MutexContender>) -> SimbaResult<ContendService> {
        let driver = SqlContendDriver::new(self.repository.clone(), self.config.clone());
        ContendService::new(contender, Arc::new(driver), self.executor.clone())
    }
}

impl MutexRetrievalServiceFactory for SqlContendServiceFactory {
    fn create_mutex_retrieval_service(&self, retriever: Arc<dyn MutexRetriever>) -> SimbaResult<RetrievalService> {
        let driver = SqlRetrievalDriver::new(self.repository.clone(), self.config.clone());
        RetrievalService::new(retriever, Arc::new(driver), self.executor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMutexOwnerRepository;
    use simba_core::{FnContender, MutexState};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn factory(repository: Arc<dyn MutexOwnerRepository>) -> SqlContendServiceFactory {
        let config = SqlConfig {
            initial_delay: Duration::ZERO,
            ttl: Duration::from_millis(500),
            transition: Duration::from_millis(300),
        };
        SqlContendServiceFactory::new(repository, config).unwrap()
    }

    #[tokio::test]
    async fn test_single_contender_acquires_and_releases_row() {
        let repository: Arc<dyn MutexOwnerRepository> = Arc::new(MemoryMutexOwnerRepository::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<(bool, MutexState)>();
        let released = tx.clone();
        let contender = FnContender::with_id("sql-single", "a")
            .unwrap()
            .on_acquired(move |s| {
                let _ = tx.send((true, s));
            })
            .on_released(move |s| {
                let _ = released.send((false, s));
            });
        let service = factory(repository.clone())
            .create_mutex_contend_service(Arc::new(contender))
            .unwrap();

        service.start().await.unwrap();
        let (acquired, _) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(acquired);
        assert!(repository.get_owner("sql-single").await.unwrap().is_owner("a"));

        service.stop().await.unwrap();
        let (acquired, state) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(!acquired);
        assert!(state.after().is_none());
        assert!(repository.get_owner("sql-single").await.unwrap().owner.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_service_frees_the_mutex() {
        let repository: Arc<dyn MutexOwnerRepository> = Arc::new(MemoryMutexOwnerRepository::new());
        let factory = factory(repository.clone());

        let a = factory
            .create_mutex_contend_service(Arc::new(FnContender::with_id("sql-dropped", "a").unwrap()))
            .unwrap();
        a.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(a.is_owner());
        drop(a);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let contender = FnContender::with_id("sql-dropped", "b").unwrap().on_acquired(move |s| {
            let _ = tx.send(s);
        });
        let b = factory.create_mutex_contend_service(Arc::new(contender)).unwrap();
        b.start().await.unwrap();

        let state = timeout(Duration::from_secs(3), rx.recv()).await.unwrap().unwrap();
        assert!(state.is_acquired("b"));
        assert!(repository.get_owner("sql-dropped").await.unwrap().is_owner("b"));
        b.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_retrieval_sees_owner() {
        let repository: Arc<dyn MutexOwnerRepository> = Arc::new(MemoryMutexOwnerRepository::new());
        repository.acquire_and_get_owner("sql-observed", "leader", 5_000, 1_000).await.unwrap();

        struct Forward(mpsc::UnboundedSender<MutexState>);
        impl MutexRetriever for Forward {
            fn mutex(&self) -> &str {
                "sql-observed"
            }
            fn notify_owner(&self, state: MutexState) {
                let _ = self.0.send(state);
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = factory(repository)
            .create_mutex_retrieval_service(Arc::new(Forward(tx)))
            .unwrap();
        service.start().await.unwrap();
        let state = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(state.after().owner_id(), "leader");
        service.stop().await.unwrap();
    }
}
