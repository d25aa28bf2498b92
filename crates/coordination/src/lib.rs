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

//! # Simba Coordination Backend
//!
//! ## Purpose
//! Leadership through a coordination service's ordered ephemeral nodes. The
//! service keeps a leader for as long as its session lives, so owners carry
//! unbounded windows and no renewal timer runs.
//!
//! ## Backend Support
//! - **InMemory**: [`memory::MemoryCoordinationServer`] with session expiry
//! - **ZooKeeper**: `ZookeeperCoordinationClient` (requires `zookeeper-backend` feature)
//! - Any ensemble client implementing [`CoordinationClient`]

pub mod client;
pub mod driver;
pub mod latch;
pub mod memory;
#[cfg(feature = "zookeeper-backend")]
pub mod zookeeper;

pub use client::CoordinationClient;
pub use driver::{CoordinationContendDriver, CoordinationContendServiceFactory, RETRY_DELAY};
pub use latch::{mutex_path, LatchPosition, LeaderLatch};
pub use memory::{MemoryCoordinationClient, MemoryCoordinationServer};
#[cfg(feature = "zookeeper-backend")]
pub use zookeeper::ZookeeperCoordinationClient;
