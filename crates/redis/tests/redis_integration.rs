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

//! Redis scripted store integration tests.
//!
//! Require a Redis server at `SIMBA_REDIS_URL` (default
//! `redis://127.0.0.1:6379`); each test is skipped when none is reachable.

#[cfg(feature = "redis-backend")]
mod tests {
    use futures::StreamExt;
    use simba_redis::{contender_channel, mutex_channel, AcquireResult, RedisScriptedStore, ScriptedStore};
    use tokio::time::{timeout, Duration};

    async fn connect() -> Option<RedisScriptedStore> {
        let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();
        let url = std::env::var("SIMBA_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        match RedisScriptedStore::new(&url).await {
            Ok(store) => Some(store),
            Err(e) => {
                eprintln!("skipping redis test: {e}");
                None
            }
        }
    }

    fn unique(name: &str) -> String {
        format!("{name}-{}", std::process::id())
    }

    #[tokio::test]
    async fn test_redis_acquire_guard_release() {
        let Some(store) = connect().await else { return };
        let mutex = unique("scripts");

        let first = AcquireResult::of(&store.acquire(&mutex, "a", 5_000).await.unwrap()).unwrap();
        assert_eq!(first.owner_id(), "a");
        assert_eq!(first.remaining_ms(), 5_000);

        let other = AcquireResult::of(&store.acquire(&mutex, "b", 5_000).await.unwrap()).unwrap();
        assert_eq!(other.owner_id(), "a");
        assert!(other.remaining_ms() > 0 && other.remaining_ms() <= 5_000);

        let guarded = AcquireResult::of(&store.guard(&mutex, "a", 8_000).await.unwrap()).unwrap();
        assert_eq!(guarded.remaining_ms(), 8_000);
        let not_owner = AcquireResult::of(&store.guard(&mutex, "b", 8_000).await.unwrap()).unwrap();
        assert_eq!(not_owner.owner_id(), "a");

        assert!(!store.release(&mutex, "b").await.unwrap());
        assert!(store.release(&mutex, "a").await.unwrap());
        assert_eq!(store.inspect(&mutex).await.unwrap(), "@@");
    }

    #[tokio::test]
    async fn test_redis_release_wakes_waiter() {
        let Some(store) = connect().await else { return };
        let mutex = unique("waiters");

        let mut broadcast = store.subscribe(vec![mutex_channel(&mutex)]).await.unwrap();
        let mut personal = store.subscribe(vec![contender_channel(&mutex, "b")]).await.unwrap();

        store.acquire(&mutex, "a", 5_000).await.unwrap();
        let acquired = timeout(Duration::from_secs(2), broadcast.next()).await.unwrap().unwrap();
        assert_eq!(acquired.payload, "acquired@@a");

        store.acquire(&mutex, "b", 5_000).await.unwrap();
        store.release(&mutex, "a").await.unwrap();
        let woken = timeout(Duration::from_secs(2), personal.next()).await.unwrap().unwrap();
        assert_eq!(woken.payload, "released@@a");
        assert_eq!(woken.channel, contender_channel(&mutex, "b"));
    }
}
