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

//! Contend service: drives the leadership protocol for one (mutex, contender) pair.
//!
//! A [`ContendService`] owns the lifecycle (start/stop), the current
//! [`MutexState`] and the notification pipeline. The protocol itself lives in a
//! backend-specific [`ContendDriver`], which runs on the service's timer task
//! for as long as the service is running and pushes every owner it observes
//! through [`ContendContext::notify_owner`].

use crate::contender::{validate_contender, ContenderRetriever, MutexContender, MutexRetriever};
use crate::error::SimbaResult;
use crate::executor::HandlerExecutor;
use crate::notifier::{spawn_dispatcher, OwnerNotifier};
use crate::owner::MutexOwner;
use crate::state::MutexState;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backend side of a contend service.
///
/// `run_contend` is the timer loop. It is spawned on `start` and must return
/// once the context is cancelled. `stop_contend` runs after the loop has ended
/// and performs the best-effort release.
#[async_trait]
pub trait ContendDriver: Send + Sync + 'static {
    /// Label used in logs and metrics.
    fn backend(&self) -> &'static str;

    async fn run_contend(&self, ctx: ContendContext);

    async fn stop_contend(&self, ctx: &ContendContext) -> SimbaResult<()>;
}

/// Handle given to a driver for one running interval of a service.
#[derive(Clone)]
pub struct ContendContext {
    backend: &'static str,
    mutex: Arc<str>,
    contender_id: Arc<str>,
    notifier: OwnerNotifier,
    cancel: CancellationToken,
}

impl ContendContext {
    pub(crate) fn new(
        backend: &'static str,
        mutex: &str,
        contender_id: &str,
        notifier: OwnerNotifier,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            mutex: Arc::from(mutex),
            contender_id: Arc::from(contender_id),
            notifier,
            cancel,
        }
    }

    pub fn mutex(&self) -> &str {
        &self.mutex
    }

    pub fn contender_id(&self) -> &str {
        &self.contender_id
    }

    /// Push an observed owner into the notification pipeline.
    ///
    /// Observations made after cancellation are discarded and `None` is
    /// returned; the service publishes the final state itself on stop.
    pub fn notify_owner(&self, owner: MutexOwner) -> Option<MutexState> {
        if self.cancel.is_cancelled() {
            debug!(mutex = %self.mutex, contender_id = %self.contender_id, "discarding owner observed after stop");
            return None;
        }
        let state = self.notifier.notify_owner(owner);
        if !self.contender_id.is_empty() && state.is_acquired(&self.contender_id) {
            metrics::counter!("simba_acquire_total", "backend" => self.backend).increment(1);
        }
        Some(state)
    }

    pub fn after_owner(&self) -> MutexOwner {
        self.notifier.after_owner()
    }

    /// Whether the last published owner is this contender.
    pub fn is_owner(&self) -> bool {
        self.notifier.after_owner().is_owner(&self.contender_id)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the running interval ends.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Sleep for `delay_ms`; returns `false` if cancelled first.
    pub async fn sleep(&self, delay_ms: u64) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(Duration::from_millis(delay_ms)) => true,
        }
    }
}

impl fmt::Debug for ContendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContendContext")
            .field("mutex", &self.mutex)
            .field("contender_id", &self.contender_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

struct Running {
    ctx: ContendContext,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Lifecycle {
    dispatch_rx: Option<mpsc::UnboundedReceiver<MutexState>>,
    running: Option<Running>,
}

struct Inner {
    mutex: String,
    contender_id: String,
    driver: Arc<dyn ContendDriver>,
    notifier: OwnerNotifier,
    retriever: Arc<dyn MutexRetriever>,
    executor: HandlerExecutor,
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

/// Contends for a mutex on behalf of one contender.
///
/// Cheap to clone; clones share the same lifecycle.
#[derive(Clone)]
pub struct ContendService {
    inner: Arc<Inner>,
}

impl ContendService {
    /// Build a service for `contender` driven by `driver`.
    pub fn new(
        contender: Arc<dyn MutexContender>,
        driver: Arc<dyn ContendDriver>,
        executor: HandlerExecutor,
    ) -> SimbaResult<Self> {
        validate_contender(contender.as_ref())?;
        let mutex = contender.mutex().to_string();
        let contender_id = contender.contender_id().to_string();
        let (notifier, dispatch_rx) = OwnerNotifier::new(&mutex);
        let retriever: Arc<dyn MutexRetriever> = Arc::new(ContenderRetriever::new(contender));
        Ok(Self {
            inner: Arc::new(Inner {
                mutex,
                contender_id,
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

    /// Begin contending. No-op when already running.
    pub async fn start(&self) -> SimbaResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.running.is_some() {
            debug!(mutex = %self.inner.mutex, contender_id = %self.inner.contender_id, "start ignored, already running");
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
            &self.inner.contender_id,
            self.inner.notifier.clone(),
            cancel.clone(),
        );
        let driver = self.inner.driver.clone();
        let loop_ctx = ctx.clone();
        let task = tokio::spawn(async move { driver.run_contend(loop_ctx).await });
        lifecycle.running = Some(Running { ctx, cancel, task });

        metrics::counter!("simba_contend_starts_total", "backend" => self.inner.driver.backend()).increment(1);
        info!(
            "Contender {} started on mutex {} [{}]",
            self.inner.contender_id,
            self.inner.mutex,
            self.inner.driver.backend()
        );
        Ok(())
    }

    /// Stop contending, release if owner and publish the "none" state.
    /// No-op when not running.
    pub async fn stop(&self) -> SimbaResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let Some(running) = lifecycle.running.take() else {
            debug!(mutex = %self.inner.mutex, contender_id = %self.inner.contender_id, "stop ignored, not running");
            return Ok(());
        };
        self.inner.running.store(false, Ordering::SeqCst);
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            if e.is_panic() {
                warn!(mutex = %self.inner.mutex, error = %e, "contend loop panicked");
            }
        }
        if let Err(e) = self.inner.driver.stop_contend(&running.ctx).await {
            warn!(
                mutex = %self.inner.mutex,
                contender_id = %self.inner.contender_id,
                error = %e,
                "release on stop failed"
            );
        }
        self.inner.notifier.notify_owner(MutexOwner::NONE);
        metrics::counter!("simba_contend_stops_total", "backend" => self.inner.driver.backend()).increment(1);
        info!("Contender {} stopped on mutex {}", self.inner.contender_id, self.inner.mutex);
        Ok(())
    }

    /// Same as [`ContendService::stop`].
    pub async fn close(&self) -> SimbaResult<()> {
        self.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn mutex(&self) -> &str {
        &self.inner.mutex
    }

    pub fn contender_id(&self) -> &str {
        &self.inner.contender_id
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

    pub fn is_owner(&self) -> bool {
        self.after_owner().is_owner(&self.inner.contender_id)
    }

    /// Owner and still inside the TTL.
    pub fn is_in_ttl(&self) -> bool {
        self.after_owner().is_in_ttl_of(&self.inner.contender_id)
    }

    /// Whether any contender currently holds the mutex.
    pub fn has_owner(&self) -> bool {
        self.after_owner().has_owner()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutexState> {
        self.inner.notifier.subscribe()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let Some(running) = self.lifecycle.get_mut().running.take() else {
            return;
        };
        running.cancel.cancel();
        debug!(mutex = %self.mutex, contender_id = %self.contender_id, "contend service dropped while running");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let driver = self.driver.clone();
            handle.spawn(async move {
                let _ = running.task.await;
                if let Err(e) = driver.stop_contend(&running.ctx).await {
                    warn!(mutex = %running.ctx.mutex(), error = %e, "release on drop failed");
                }
            });
        }
    }
}

impl fmt::Debug for ContendService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContendService")
            .field("mutex", &self.inner.mutex)
            .field("contender_id", &self.inner.contender_id)
            .field("backend", &self.inner.driver.backend())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Creates contend services for a particular backend.
pub trait MutexContendServiceFactory: Send + Sync {
    fn create_mutex_contend_service(&self, contender: Arc<dyn MutexContender>) -> SimbaResult<ContendService>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contender::FnContender;
    use crate::owner::MutexOwner;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::timeout;

    /// Wins immediately and keeps re-asserting ownership.
    struct EagerDriver {
        released: AtomicUsize,
    }

    #[async_trait]
    impl ContendDriver for EagerDriver {
        fn backend(&self) -> &'static str {
            "test"
        }

        async fn run_contend(&self, ctx: ContendContext) {
            loop {
                let now = crate::clock::current_millis();
                ctx.notify_owner(MutexOwner::new(ctx.contender_id(), now, now + 1_000, now + 2_000));
                if !ctx.sleep(50).await {
                    return;
                }
            }
        }

        async fn stop_contend(&self, _ctx: &ContendContext) -> SimbaResult<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn contender(tx: mpsc::UnboundedSender<(&'static str, MutexState)>) -> Arc<dyn MutexContender> {
        let released = tx.clone();
        Arc::new(
            FnContender::with_id("service-test", "c1")
                .unwrap()
                .on_acquired(move |s| {
                    let _ = tx.send(("acquired", s));
                })
                .on_released(move |s| {
                    let _ = released.send(("released", s));
                }),
        )
    }

    #[tokio::test]
    async fn test_start_stop_fires_callbacks_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver = Arc::new(EagerDriver {
            released: AtomicUsize::new(0),
        });
        let service = ContendService::new(contender(tx), driver.clone(), HandlerExecutor::ambient()).unwrap();

        service.start().await.unwrap();
        service.start().await.unwrap();
        assert!(service.is_running());

        let (event, state) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event, "acquired");
        assert!(state.before().is_none());
        assert!(service.is_owner());
        assert!(service.is_in_ttl());
        assert!(service.has_owner());

        service.stop().await.unwrap();
        service.stop().await.unwrap();
        assert!(!service.is_running());
        assert_eq!(driver.released.load(Ordering::SeqCst), 1);

        let (event, state) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event, "released");
        assert_eq!(state.before().owner_id(), "c1");
        assert!(state.after().is_none());
        assert!(!service.is_owner());
    }

    #[tokio::test]
    async fn test_restart_produces_fresh_acquire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver = Arc::new(EagerDriver {
            released: AtomicUsize::new(0),
        });
        let service = ContendService::new(contender(tx), driver, HandlerExecutor::ambient()).unwrap();

        let mut acquired_at = Vec::new();
        for _ in 0..2 {
            service.start().await.unwrap();
            let (event, state) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
            assert_eq!(event, "acquired");
            acquired_at.push(state.after().acquired_at());
            tokio::time::sleep(Duration::from_millis(5)).await;
            service.stop().await.unwrap();
            let (event, _) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
            assert_eq!(event, "released");
        }
        assert_ne!(acquired_at[0], acquired_at[1]);
    }

    #[tokio::test]
    async fn test_drop_while_running_cancels_and_releases() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver = Arc::new(EagerDriver {
            released: AtomicUsize::new(0),
        });
        let service = ContendService::new(contender(tx), driver.clone(), HandlerExecutor::ambient()).unwrap();
        service.start().await.unwrap();
        let (event, _) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event, "acquired");

        drop(service);

        timeout(Duration::from_secs(2), async {
            while driver.released.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        // Only the driver's Arc remains once the loop task has finished.
        timeout(Duration::from_secs(2), async {
            while Arc::strong_count(&driver) > 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[derive(Default)]
    struct Hits(std::sync::atomic::AtomicU64);

    impl metrics::CounterFn for Hits {
        fn increment(&self, value: u64) {
            self.0.fetch_add(value, Ordering::SeqCst);
        }

        fn absolute(&self, value: u64) {
            self.0.store(value, Ordering::SeqCst);
        }
    }

    struct AcquireRecorder(Arc<Hits>);

    impl metrics::Recorder for AcquireRecorder {
        fn describe_counter(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}
        fn describe_gauge(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}
        fn describe_histogram(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}

        fn register_counter(&self, key: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Counter {
            if key.name() == "simba_acquire_total" {
                metrics::Counter::from_arc(self.0.clone())
            } else {
                metrics::Counter::noop()
            }
        }

        fn register_gauge(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Gauge {
            metrics::Gauge::noop()
        }

        fn register_histogram(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Histogram {
            metrics::Histogram::noop()
        }
    }

    #[test]
    fn test_acquire_counted_once_per_term() {
        let hits = Arc::new(Hits::default());
        let recorder = AcquireRecorder(hits.clone());
        let (notifier, _rx) = OwnerNotifier::new("counted");
        let ctx = ContendContext::new("test", "counted", "c1", notifier, CancellationToken::new());

        metrics::with_local_recorder(&recorder, || {
            for term in 0..3 {
                ctx.notify_owner(MutexOwner::new("c1", term, term + 10, term + 20));
            }
            ctx.notify_owner(MutexOwner::new("other", 5, 15, 25));
            ctx.notify_owner(MutexOwner::new("c1", 30, 40, 50));
        });

        assert_eq!(hits.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_blank_contender_rejected() {
        let driver = Arc::new(EagerDriver {
            released: AtomicUsize::new(0),
        });
        struct Blank;
        impl MutexContender for Blank {
            fn mutex(&self) -> &str {
                ""
            }
            fn contender_id(&self) -> &str {
                "c"
            }
        }
        let err = ContendService::new(Arc::new(Blank), driver, HandlerExecutor::ambient()).unwrap_err();
        assert!(matches!(err, crate::SimbaError::InvalidArgument(_)));
    }
}
