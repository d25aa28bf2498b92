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

//! # Simba Redis Backend
//!
//! ## Purpose
//! Key-value implementation of the mutex protocol. The owner id lives under
//! the key `{mutex}` with a lease-length expiry. Acquire, guard and release are
//! server-side scripts, and pub/sub tells contenders about new owners and
//! wakes a waiting contender as soon as the holder releases.
//!
//! ## Backend Support
//! - **InMemory**: [`store::MemoryScriptedStore`] (always available, same semantics as the scripts)
//! - **Redis**: [`RedisScriptedStore`] (feature: `redis-backend`)
//!
//! ## Design Decisions
//! - **Waiter queue**: a sorted set scored by the time a contender first failed
//!   to acquire; a release wakes the oldest waiter only
//! - **Event time**: owners announced over pub/sub are timed from local receipt
//! - **Guard lease**: a guard extends the key to `ttl + transition`, the same
//!   lease an acquire grants

pub mod driver;
pub mod message;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod store;

pub use driver::{KvConfig, KvContendDriver, KvContendServiceFactory, KvRetrievalDriver};
pub use message::{contender_channel, mutex_channel, mutex_key, AcquireResult, OwnerEvent, OwnerEventKind};
#[cfg(feature = "redis-backend")]
pub use self::redis::RedisScriptedStore;
pub use store::{ChannelMessage, MemoryScriptedStore, ScriptedStore};
