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

//! Scripted key-value store contract and its in-memory implementation.

use crate::message::{contender_channel, mutex_channel, AcquireResult, OwnerEvent, OwnerEventKind, DELIMITER};
use async_trait::async_trait;
use futures::stream::BoxStream;
use simba_core::{Clock, SimbaResult, SystemClock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

/// One message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: String,
}

/// Atomic primitives of the key-value protocol plus pub/sub.
///
/// Script results use the [`AcquireResult`] text format.
#[async_trait]
pub trait ScriptedStore: Send + Sync + 'static {
    /// Take the mutex for `lease_ms` if free, else join its waiters.
    async fn acquire(&self, mutex: &str, contender_id: &str, lease_ms: i64) -> SimbaResult<String>;

    /// Extend the lease to `lease_ms` if `contender_id` holds it.
    async fn guard(&self, mutex: &str, contender_id: &str, lease_ms: i64) -> SimbaResult<String>;

    /// Delete the key if `contender_id` holds it and wake one waiter.
    async fn release(&self, mutex: &str, contender_id: &str) -> SimbaResult<bool>;

    /// Current holder and remaining lease, without side effects.
    async fn inspect(&self, mutex: &str) -> SimbaResult<String>;

    /// Subscribe to `channels`. The subscription is active once this returns.
    async fn subscribe(&self, channels: Vec<String>) -> SimbaResult<BoxStream<'static, ChannelMessage>>;
}

#[derive(Debug, Clone)]
struct Lease {
    owner_id: String,
    expires_at: i64,
}

#[derive(Default)]
struct Keyspace {
    leases: HashMap<String, Lease>,
    /// Waiters per mutex ordered by (queued_at, contender_id).
    waiters: HashMap<String, BTreeSet<(i64, String)>>,
}

impl Keyspace {
    fn live_lease(&mut self, mutex: &str, now: i64) -> Option<Lease> {
        let expired = self.leases.get(mutex).is_some_and(|lease| lease.expires_at <= now);
        if expired {
            self.leases.remove(mutex);
        }
        self.leases.get(mutex).cloned()
    }

    fn remove_waiter(&mut self, mutex: &str, contender_id: &str) {
        if let Some(queue) = self.waiters.get_mut(mutex) {
            queue.retain(|(_, id)| id != contender_id);
        }
    }

    fn add_waiter(&mut self, mutex: &str, contender_id: &str, now: i64) {
        let queue = self.waiters.entry(mutex.to_string()).or_default();
        if !queue.iter().any(|(_, id)| id == contender_id) {
            queue.insert((now, contender_id.to_string()));
        }
    }

    fn pop_waiter(&mut self, mutex: &str) -> Option<String> {
        self.waiters.get_mut(mutex)?.pop_first().map(|(_, id)| id)
    }
}

fn result_of(lease: &Lease, now: i64) -> String {
    AcquireResult::new(lease.owner_id.clone(), lease.expires_at - now).to_string()
}

/// Process-local store with the same semantics as the Redis scripts.
#[derive(Clone)]
pub struct MemoryScriptedStore {
    keyspace: Arc<Mutex<Keyspace>>,
    bus: broadcast::Sender<ChannelMessage>,
    clock: Arc<dyn Clock>,
}

impl MemoryScriptedStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (bus, _) = broadcast::channel(1024);
        Self {
            keyspace: Arc::new(Mutex::new(Keyspace::default())),
            bus,
            clock,
        }
    }

    fn publish(&self, channel: String, payload: String) {
        debug!(%channel, %payload, "publish");
        let _ = self.bus.send(ChannelMessage { channel, payload });
    }
}

impl Default for MemoryScriptedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptedStore for MemoryScriptedStore {
    async fn acquire(&self, mutex: &str, contender_id: &str, lease_ms: i64) -> SimbaResult<String> {
        let now = self.clock.now_millis();
        let mut keyspace = self.keyspace.lock().await;
        if let Some(lease) = keyspace.live_lease(mutex, now) {
            keyspace.add_waiter(mutex, contender_id, now);
            return Ok(result_of(&lease, now));
        }
        keyspace.leases.insert(
            mutex.to_string(),
            Lease {
                owner_id: contender_id.to_string(),
                expires_at: now + lease_ms,
            },
        );
        keyspace.remove_waiter(mutex, contender_id);
        self.publish(mutex_channel(mutex), OwnerEvent::message(OwnerEventKind::Acquired, contender_id));
        Ok(AcquireResult::new(contender_id, lease_ms).to_string())
    }

    async fn guard(&self, mutex: &str, contender_id: &str, lease_ms: i64) -> SimbaResult<String> {
        let now = self.clock.now_millis();
        let mut keyspace = self.keyspace.lock().await;
        let Some(lease) = keyspace.live_lease(mutex, now) else {
            return Ok(DELIMITER.to_string());
        };
        if lease.owner_id != contender_id {
            return Ok(result_of(&lease, now));
        }
        keyspace.leases.insert(
            mutex.to_string(),
            Lease {
                owner_id: lease.owner_id,
                expires_at: now + lease_ms,
            },
        );
        Ok(AcquireResult::new(contender_id, lease_ms).to_string())
    }

    async fn release(&self, mutex: &str, contender_id: &str) -> SimbaResult<bool> {
        let now = self.clock.now_millis();
        let mut keyspace = self.keyspace.lock().await;
        keyspace.remove_waiter(mutex, contender_id);
        match keyspace.live_lease(mutex, now) {
            Some(lease) if lease.owner_id == contender_id => {
                keyspace.leases.remove(mutex);
                if let Some(waiter) = keyspace.pop_waiter(mutex) {
                    self.publish(
                        contender_channel(mutex, &waiter),
                        OwnerEvent::message(OwnerEventKind::Released, contender_id),
                    );
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn inspect(&self, mutex: &str) -> SimbaResult<String> {
        let now = self.clock.now_millis();
        let mut keyspace = self.keyspace.lock().await;
        Ok(match keyspace.live_lease(mutex, now) {
            Some(lease) => result_of(&lease, now),
            None => DELIMITER.to_string(),
        })
    }

    async fn subscribe(&self, channels: Vec<String>) -> SimbaResult<BoxStream<'static, ChannelMessage>> {
        let mut rx = self.bus.subscribe();
        let channels: HashSet<String> = channels.into_iter().collect();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if channels.contains(&message.channel) {
                            yield message;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use simba_core::ManualClock;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_acquire_guard_release() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = MemoryScriptedStore::with_clock(clock.clone());

        assert_eq!(store.acquire("m", "a", 300).await.unwrap(), "a@@300");
        clock.advance(100);
        assert_eq!(store.acquire("m", "b", 300).await.unwrap(), "a@@200");
        assert_eq!(store.guard("m", "b", 300).await.unwrap(), "a@@200");
        assert_eq!(store.guard("m", "a", 300).await.unwrap(), "a@@300");
        assert_eq!(store.inspect("m").await.unwrap(), "a@@300");

        assert!(!store.release("m", "b").await.unwrap());
        assert!(store.release("m", "a").await.unwrap());
        assert_eq!(store.inspect("m").await.unwrap(), "@@");
        assert_eq!(store.guard("m", "a", 300).await.unwrap(), "@@");
    }

    #[tokio::test]
    async fn test_lease_expires() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryScriptedStore::with_clock(clock.clone());
        store.acquire("m", "a", 100).await.unwrap();
        clock.advance(100);
        assert_eq!(store.acquire("m", "b", 100).await.unwrap(), "b@@100");
    }

    #[tokio::test]
    async fn test_release_wakes_oldest_waiter_only() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryScriptedStore::with_clock(clock.clone());
        let mut broadcast = store.subscribe(vec![mutex_channel("m")]).await.unwrap();
        let mut first = store.subscribe(vec![contender_channel("m", "b")]).await.unwrap();
        let mut second = store.subscribe(vec![contender_channel("m", "c")]).await.unwrap();

        store.acquire("m", "a", 1_000).await.unwrap();
        let acquired = timeout(Duration::from_secs(1), broadcast.next()).await.unwrap().unwrap();
        assert_eq!(acquired.payload, "acquired@@a");

        store.acquire("m", "b", 1_000).await.unwrap();
        clock.advance(1);
        store.acquire("m", "c", 1_000).await.unwrap();
        store.acquire("m", "b", 1_000).await.unwrap();

        store.release("m", "a").await.unwrap();
        let woken = timeout(Duration::from_secs(1), first.next()).await.unwrap().unwrap();
        assert_eq!(woken.payload, "released@@a");
        assert!(timeout(Duration::from_millis(50), second.next()).await.is_err());
    }
}
