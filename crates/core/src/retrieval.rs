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

//! Read-only observation of a mutex owner.

use crate::contender::MutexRetriever;
use crate::error::{require_not_blank, SimbaResult};
use crate::executor::HandlerExecutor;
use crate::notifier::{spawn_dispatcher, OwnerNotifier};
use crate::owner::MutexOwner;
use crate::service::ContendContext;
use crate::state::MutexState;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backend side of a retrieval service: observes the owner, never contends.
///
/// The context it receives has an empty contender id.
#[async_trait]
pub trait RetrievalDriver: Send + Sync + 'static {
    fn backend(&self) -> &'static str;

    async fn run_retrieval(&self, ctx: ContendContext);
}

#[derive(Default)]
struct Lifecycle {
    dispatch_rx: Option<mpsc::UnboundedReceiver<MutexState>>,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

struct Inner {
    mutex: String,
    driver: Arc<dyn RetrievalDriver>,
    notifier: OwnerNotifier,
    retriever: Arc<dyn MutexRetriever>,
    executor: HandlerExecutor,
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

/// Observes who owns a mutex and forwards each observation to a [`MutexRetriever`].
#[derive(Clone)]
pub struct RetrievalService {
    inner: Arc<Inner>,
}

impl RetrievalService {
    pub fn new(
        retriever: Arc<dyn MutexRetriever>,
        driver: Arc<dyn RetrievalDriver>,
        executor: HandlerExecutor,
    ) -> SimbaResult<Self> {
        require_not_blank(retriever.mutex(), "mutex")?;
        let mutex = retriever.mutex().to_string();
        let (notifier, dispatch_rx) = OwnerNotifier::new(&mutex);
        Ok(Self {
            inner: Arc::new(Inner {
                mutex,
                driver,
                notifier,
                retriever,
                executor,
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle {
                    dispatch_rx: Some(dispatch_rx),
                    running: None,
                }),
            }),
        })
    }

    pub async fn start(&self) -> SimbaResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.running.is_some() {
            return Ok(());
        }
        if let Some(rx) = lifecycle.dispatch_rx.take() {
            spawn_dispatcher(&self.inner.executor, rx, self.inner.retriever.clone());
        }
        self.inner.notifier.reset();
        self.inner.running.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let ctx = ContendContext::new(
            self.inner.driver.backend(),
            &self.inner.mutex,
            "",
            self.inner.notifier.clone(),
            cancel.clone(),
        );
        let driver = self.inner.driver.clone();
        let task = tokio::spawn(async move { driver.run_retrieval(ctx).await });
        lifecycle.running = Some((cancel, task));
        info!("Retrieval started on mutex {} [{}]", self.inner.mutex, self.inner.driver.backend());
        Ok(())
    }

    /// Stops observing. The last observed state is kept.
    pub async fn stop(&self) -> SimbaResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let Some((cancel, task)) = lifecycle.running.take() else {
            debug!(mutex = %self.inner.mutex, "stop ignored, not running");
            return Ok(());
        };
        self.inner.running.store(false, Ordering::SeqCst);
        cancel.cancel();
        if let Err(e) = task.await {
            if e.is_panic() {
                warn!(mutex = %self.inner.mutex, error = %e, "retrieval loop panicked");
            }
        }
        info!("Retrieval stopped on mutex {}", self.inner.mutex);
        Ok(())
    }

    pub async fn close(&self) -> SimbaResult<()> {
        self.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn mutex(&self) -> &str {
        &self.inner.mutex
    }

    pub fn mutex_state(&self) -> MutexState {
        self.inner.notifier.mutex_state()
    }

    pub fn before_owner(&self) -> MutexOwner {
        self.mutex_state().before().clone()
    }

    pub fn after_owner(&self) -> MutexOwner {
        self.inner.notifier.after_owner()
    }

    pub fn has_owner(&self) -> bool {
        self.after_owner().has_owner()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutexState> {
        self.inner.notifier.subscribe()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some((cancel, _task)) = self.lifecycle.get_mut().running.take() {
            cancel.cancel();
            debug!(mutex = %self.mutex, "retrieval service dropped while running");
        }
    }
}

impl fmt::Debug for RetrievalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievalService")
            .field("mutex", &self.inner.mutex)
            .field("backend", &self.inner.driver.backend())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Creates retrieval services for a particular backend.
pub trait MutexRetrievalServiceFactory: Send + Sync {
    fn create_mutex_retrieval_service(&self, retriever: Arc<dyn MutexRetriever>) -> SimbaResult<RetrievalService>;
}
