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

//! Simba: distributed mutual exclusion with stable leadership
//!
//! Contenders that agree on a mutex name learn who owns it as ownership
//! changes. An owner holds the mutex for a bounded TTL and may renew it inside
//! a transition window reserved for it, so leadership stays put.
//!
//! Backends:
//! 1. Relational: single row per mutex, server-clock conditional updates
//! 2. Key-value: scripted acquire/guard/release with pub/sub wake-ups
//! 3. Coordination service: ephemeral sequential leader latch
//!
//! Pick one with [`SimbaConfig`] (or `SIMBA_*` environment variables, see
//! [`config`]) and [`create_contend_service_factory`].

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Independent crates - re-export them here
pub use simba_coordination as coordination; // Leader latch backend
pub use simba_core as core; // Engine, contenders, locker, scheduler
pub use simba_redis as kv; // Key-value backend
pub use simba_sql as sql; // Relational backend

pub mod config;

pub use config::{
    create_contend_service_factory, create_contend_service_factory_from_env, BackendType, SimbaConfig,
};
pub use simba_core::{
    ContendPeriod, ContendService, FnContender, HandlerExecutor, MutexContendServiceFactory, MutexContender,
    MutexOwner, MutexRetrievalServiceFactory, MutexRetriever, MutexScheduler, MutexState, RetrievalService,
    ScheduleConfig, ScheduleStrategy, ScheduledWork, SimbaError, SimbaLocker, SimbaResult,
};
