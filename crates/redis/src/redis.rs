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

//! Redis-backed scripted store.
//!
//! The three protocol primitives run as Lua scripts so each is atomic on the
//! server. Waiters live in a sorted set `{mutex}:waiters` scored by the server
//! time of their first failed acquire; a release wakes the oldest one.

use crate::message::mutex_key;
use crate::store::{ChannelMessage, ScriptedStore};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use simba_core::{SimbaError, SimbaResult};
use tracing::{debug, instrument, warn};

const ACQUIRE_SCRIPT: &str = r#"
redis.replicate_commands()
local mutex = KEYS[1]
local contender = ARGV[1]
local lease = ARGV[2]
local waiters = mutex .. ':waiters'
if redis.call('set', mutex, contender, 'nx', 'px', lease) then
    redis.call('zrem', waiters, contender)
    redis.call('publish', 'simba:' .. mutex, 'acquired@@' .. contender)
    return contender .. '@@' .. lease
end
local owner = redis.call('get', mutex)
if not owner then
    return '@@'
end
local now = redis.call('time')
local score = tonumber(now[1]) * 1000 + math.floor(tonumber(now[2]) / 1000)
redis.call('zadd', waiters, 'nx', score, contender)
return owner .. '@@' .. redis.call('pttl', mutex)
"#;

const GUARD_SCRIPT: &str = r#"
local mutex = KEYS[1]
local owner = redis.call('get', mutex)
if not owner then
    return '@@'
end
if owner == ARGV[1] then
    redis.call('pexpire', mutex, ARGV[2])
    return owner .. '@@' .. ARGV[2]
end
return owner .. '@@' .. redis.call('pttl', mutex)
"#;

const RELEASE_SCRIPT: &str = r#"
local mutex = KEYS[1]
local contender = ARGV[1]
local waiters = mutex .. ':waiters'
redis.call('zrem', waiters, contender)
if redis.call('get', mutex) ~= contender then
    return 0
end
redis.call('del', mutex)
local next = redis.call('zpopmin', waiters)
if next[1] then
    redis.call('publish', 'simba:' .. mutex .. ':' .. next[1], 'released@@' .. contender)
end
return 1
"#;

const INSPECT_SCRIPT: &str = r#"
local owner = redis.call('get', KEYS[1])
if not owner then
    return '@@'
end
return owner .. '@@' .. redis.call('pttl', KEYS[1])
"#;

fn backend(context: &'static str) -> impl FnOnce(redis::RedisError) -> SimbaError {
    move |e| SimbaError::Backend(format!("Redis {context} failed: {e}"))
}

/// Scripted store over a Redis server.
#[derive(Clone)]
pub struct RedisScriptedStore {
    client: Client,
    manager: ConnectionManager,
    acquire: Script,
    guard: Script,
    release: Script,
    inspect: Script,
}

impl RedisScriptedStore {
    /// Connect to `url`, e.g. `redis://localhost:6379`.
    pub async fn new(url: &str) -> SimbaResult<Self> {
        let client = Client::open(url).map_err(backend("open"))?;
        let manager = ConnectionManager::new(client.clone()).await.map_err(backend("connect"))?;
        Ok(Self {
            client,
            manager,
            acquire: Script::new(ACQUIRE_SCRIPT),
            guard: Script::new(GUARD_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
            inspect: Script::new(INSPECT_SCRIPT),
        })
    }
}

#[async_trait]
impl ScriptedStore for RedisScriptedStore {
    #[instrument(skip(self))]
    async fn acquire(&self, mutex: &str, contender_id: &str, lease_ms: i64) -> SimbaResult<String> {
        let mut conn = self.manager.clone();
        let result: String = self
            .acquire
            .key(mutex_key(mutex))
            .arg(contender_id)
            .arg(lease_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(backend("acquire"))?;
        debug!(mutex, contender_id, %result, "acquire");
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn guard(&self, mutex: &str, contender_id: &str, lease_ms: i64) -> SimbaResult<String> {
        let mut conn = self.manager.clone();
        let result: String = self
            .guard
            .key(mutex_key(mutex))
            .arg(contender_id)
            .arg(lease_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(backend("guard"))?;
        debug!(mutex, contender_id, %result, "guard");
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn release(&self, mutex: &str, contender_id: &str) -> SimbaResult<bool> {
        let mut conn = self.manager.clone();
        let released: i64 = self
            .release
            .key(mutex_key(mutex))
            .arg(contender_id)
            .invoke_async(&mut conn)
            .await
            .map_err(backend("release"))?;
        Ok(released == 1)
    }

    async fn inspect(&self, mutex: &str) -> SimbaResult<String> {
        let mut conn = self.manager.clone();
        self.inspect
            .key(mutex_key(mutex))
            .invoke_async(&mut conn)
            .await
            .map_err(backend("inspect"))
    }

    async fn subscribe(&self, channels: Vec<String>) -> SimbaResult<BoxStream<'static, ChannelMessage>> {
        let mut pubsub = self
            .client
            .get_async_connection()
            .await
            .map_err(backend("pubsub connect"))?
            .into_pubsub();
        for channel in &channels {
            pubsub.subscribe(channel).await.map_err(backend("subscribe"))?;
        }
        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let channel = msg.get_channel_name().to_string();
            match msg.get_payload::<String>() {
                Ok(payload) => Some(ChannelMessage { channel, payload }),
                Err(e) => {
                    warn!(%channel, error = %e, "dropping undecodable message");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
