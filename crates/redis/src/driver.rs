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

//! Timer and subscription loops of the key-value backend.

use crate::message::{contender_channel, mutex_channel, AcquireResult, OwnerEvent, OwnerEventKind};
use crate::store::{ChannelMessage, ScriptedStore};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use simba_core::{
    current_millis, validate_lease, ContendContext, ContendDriver, ContendPeriod, ContendService, HandlerExecutor,
    MutexContendServiceFactory, MutexContender, MutexOwner, MutexRetrievalServiceFactory, MutexRetriever,
    RetrievalDriver, RetrievalService, SimbaError, SimbaResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

const BACKEND: &str = "redis";

/// Timing of the key-value protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvConfig {
    pub ttl: Duration,
    pub transition: Duration,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            transition: Duration::from_secs(6),
        }
    }
}

impl KvConfig {
    pub fn validate(&self) -> SimbaResult<()> {
        if self.ttl.is_zero() {
            return Err(SimbaError::Config("ttl must be greater than zero".to_string()));
        }
        validate_lease(self.ttl, self.transition)
    }

    fn ttl_ms(&self) -> i64 {
        i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    fn transition_ms(&self) -> i64 {
        i64::try_from(self.transition.as_millis()).unwrap_or(i64::MAX)
    }

    /// Key lifetime set by acquire and guard.
    fn lease_ms(&self) -> i64 {
        self.ttl_ms() + self.transition_ms()
    }

    fn owner_of(&self, result: &AcquireResult, now: i64) -> MutexOwner {
        if result.is_none() {
            return MutexOwner::NONE;
        }
        MutexOwner::from_transition_at(
            result.owner_id(),
            result.transition_at(now),
            self.ttl_ms(),
            self.transition_ms(),
        )
    }

    fn owner_of_event(&self, event: &OwnerEvent) -> MutexOwner {
        MutexOwner::from_transition_at(
            event.owner_id.as_str(),
            event.event_at + self.lease_ms(),
            self.ttl_ms(),
            self.transition_ms(),
        )
    }
}

async fn subscribe_or_idle(
    store: &dyn ScriptedStore,
    mutex: &str,
    channels: Vec<String>,
) -> BoxStream<'static, ChannelMessage> {
    match store.subscribe(channels).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!(mutex, error = %e, "subscribe failed, relying on timer only");
            stream::pending().boxed()
        }
    }
}

/// Contends with acquire / guard scripts and reacts to pub/sub messages.
pub struct KvContendDriver {
    store: Arc<dyn ScriptedStore>,
    config: KvConfig,
}

impl KvContendDriver {
    pub fn new(store: Arc<dyn ScriptedStore>, config: KvConfig) -> Self {
        Self { store, config }
    }

    /// Guard if owner, else acquire. Returns the next delay.
    async fn tick(&self, ctx: &ContendContext, period: &ContendPeriod) -> u64 {
        metrics::counter!("simba_ticks_total", "backend" => BACKEND).increment(1);
        let result = if ctx.is_owner() {
            self.store.guard(ctx.mutex(), ctx.contender_id(), self.config.lease_ms()).await
        } else {
            self.store.acquire(ctx.mutex(), ctx.contender_id(), self.config.lease_ms()).await
        };
        self.notify_and_schedule(ctx, period, result)
    }

    async fn acquire(&self, ctx: &ContendContext, period: &ContendPeriod) -> u64 {
        let result = self
            .store
            .acquire(ctx.mutex(), ctx.contender_id(), self.config.lease_ms())
            .await;
        self.notify_and_schedule(ctx, period, result)
    }

    fn notify_and_schedule(&self, ctx: &ContendContext, period: &ContendPeriod, result: SimbaResult<String>) -> u64 {
        match result.and_then(|raw| AcquireResult::of(&raw)) {
            Ok(result) => {
                let owner = self.config.owner_of(&result, current_millis());
                let next_delay = period.ensure_next_delay(&owner);
                ctx.notify_owner(owner);
                next_delay
            }
            Err(e) => {
                metrics::counter!("simba_backend_errors_total", "backend" => BACKEND).increment(1);
                warn!(mutex = %ctx.mutex(), contender_id = %ctx.contender_id(), error = %e, "contend failed");
                self.config.ttl_ms() as u64
            }
        }
    }

    /// Returns a new delay when the message triggered an acquire.
    async fn on_message(&self, ctx: &ContendContext, period: &ContendPeriod, message: ChannelMessage) -> Option<u64> {
        debug!(mutex = %ctx.mutex(), contender_id = %ctx.contender_id(), channel = %message.channel, payload = %message.payload, "onMessage");
        let event = match OwnerEvent::of(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(channel = %message.channel, error = %e, "ignoring malformed message");
                return None;
            }
        };
        match event.kind {
            OwnerEventKind::Released => {
                ctx.notify_owner(MutexOwner::NONE);
                Some(self.acquire(ctx, period).await)
            }
            OwnerEventKind::Acquired => {
                ctx.notify_owner(self.config.owner_of_event(&event));
                None
            }
        }
    }
}

#[async_trait]
impl ContendDriver for KvContendDriver {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn run_contend(&self, ctx: ContendContext) {
        let period = ContendPeriod::new(ctx.contender_id());
        let channels = vec![
            mutex_channel(ctx.mutex()),
            contender_channel(ctx.mutex(), ctx.contender_id()),
        ];
        let mut messages = subscribe_or_idle(self.store.as_ref(), ctx.mutex(), channels).await;
        let timer = sleep(Duration::ZERO);
        tokio::pin!(timer);
        loop {
            let next_delay = tokio::select! {
                _ = ctx.cancelled() => return,
                _ = &mut timer => Some(self.tick(&ctx, &period).await),
                message = messages.next() => match message {
                    Some(message) => self.on_message(&ctx, &period, message).await,
                    None => {
                        warn!(mutex = %ctx.mutex(), "subscription closed, relying on timer only");
                        messages = stream::pending().boxed();
                        None
                    }
                },
            };
            if let Some(delay) = next_delay {
                debug!(mutex = %ctx.mutex(), contender_id = %ctx.contender_id(), next_delay = delay, "nextSchedule");
                timer.as_mut().reset(Instant::now() + Duration::from_millis(delay));
            }
        }
    }

    async fn stop_contend(&self, ctx: &ContendContext) -> SimbaResult<()> {
        let released = self.store.release(ctx.mutex(), ctx.contender_id()).await?;
        if released {
            metrics::counter!("simba_release_total", "backend" => BACKEND).increment(1);
        }
        debug!(mutex = %ctx.mutex(), contender_id = %ctx.contender_id(), released, "release");
        Ok(())
    }
}

/// Observes the key and the broadcast channel without contending.
pub struct KvRetrievalDriver {
    store: Arc<dyn ScriptedStore>,
    config: KvConfig,
}

impl KvRetrievalDriver {
    pub fn new(store: Arc<dyn ScriptedStore>, config: KvConfig) -> Self {
        Self { store, config }
    }

    async fn poll(&self, ctx: &ContendContext) -> u64 {
        match self.store.inspect(ctx.mutex()).await.and_then(|raw| AcquireResult::of(&raw)) {
            Ok(result) => {
                let owner = self.config.owner_of(&result, current_millis());
                let next_delay = ContendPeriod::ensure_next_contender_delay(&owner);
                ctx.notify_owner(owner);
                next_delay
            }
            Err(e) => {
                metrics::counter!("simba_backend_errors_total", "backend" => BACKEND).increment(1);
                warn!(mutex = %ctx.mutex(), error = %e, "retrieval failed");
                self.config.ttl_ms() as u64
            }
        }
    }
}

#[async_trait]
impl RetrievalDriver for KvRetrievalDriver {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn run_retrieval(&self, ctx: ContendContext) {
        let mut messages = subscribe_or_idle(self.store.as_ref(), ctx.mutex(), vec![mutex_channel(ctx.mutex())]).await;
        let timer = sleep(Duration::ZERO);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = &mut timer => {
                    let delay = self.poll(&ctx).await;
                    timer.as_mut().reset(Instant::now() + Duration::from_millis(delay));
                }
                message = messages.next() => match message {
                    Some(message) => match OwnerEvent::of(&message.payload) {
                        Ok(event) if event.kind == OwnerEventKind::Acquired => {
                            ctx.notify_owner(self.config.owner_of_event(&event));
                        }
                        Ok(_) => {}
                        Err(e) => warn!(channel = %message.channel, error = %e, "ignoring malformed message"),
                    },
                    None => messages = stream::pending().boxed(),
                },
            }
        }
    }
}

/// Builds key-value contend and retrieval services over one store.
#[derive(Clone)]
pub struct KvContendServiceFactory {
    store: Arc<dyn ScriptedStore>,
    config: KvConfig,
    executor: HandlerExecutor,
}

impl KvContendServiceFactory {
    pub fn new(store: Arc<dyn ScriptedStore>, config: KvConfig) -> SimbaResult<Self> {
        Self::with_executor(store, config, HandlerExecutor::ambient())
    }

    pub fn with_executor(store: Arc<dyn ScriptedStore>, config: KvConfig, executor: HandlerExecutor) -> SimbaResult<Self> {
        config.validate()?;
        Ok(Self { store, config, executor })
    }
}

impl MutexContendServiceFactory for KvContendServiceFactory {
    fn create_mutex_contend_service(&self, contender: Arc<dyn MutexContender>) -> SimbaResult<ContendService> {
        let driver = KvContendDriver::new(self.store.clone(), self.config.clone());
        ContendService::new(contender, Arc::new(driver), self.executor.clone())
    }
}

impl MutexRetrievalServiceFactory for KvContendServiceFactory {
    fn create_mutex_retrieval_service(&self, retriever: Arc<dyn MutexRetriever>) -> SimbaResult<RetrievalService> {
        let driver = KvRetrievalDriver::new(self.store.clone(), self.config.clone());
        RetrievalService::new(retriever, Arc::new(driver), self.executor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_windows_from_result() {
        let config = KvConfig {
            ttl: Duration::from_millis(1_000),
            transition: Duration::from_millis(500),
        };
        let owner = config.owner_of(&AcquireResult::new("a", 1_500), 10_000);
        assert_eq!(owner.owner_id(), "a");
        assert_eq!(owner.transition_at(), 11_500);
        assert_eq!(owner.ttl_at(), 11_000);
        assert_eq!(owner.acquired_at(), 10_000);
        assert!(config.owner_of(&AcquireResult::NONE, 10_000).is_none());
    }

    #[test]
    fn test_owner_windows_from_event() {
        let config = KvConfig::default();
        let event = OwnerEvent::of_at("acquired@@b", 1_000).unwrap();
        let owner = config.owner_of_event(&event);
        assert_eq!(owner.acquired_at(), 1_000);
        assert_eq!(owner.ttl_at(), 11_000);
        assert_eq!(owner.transition_at(), 17_000);
    }

    #[test]
    fn test_lease_overflow_rejected() {
        let config = KvConfig {
            ttl: Duration::from_secs(10),
            transition: Duration::MAX,
        };
        assert!(matches!(config.validate(), Err(SimbaError::Config(_))));
        assert!(KvConfig::default().validate().is_ok());
    }
}
