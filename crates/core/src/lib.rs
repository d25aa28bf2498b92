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

//! # Simba Core
//!
//! ## Purpose
//! Distributed mutual exclusion with stable leadership. Contenders that agree
//! on a mutex name learn who owns it as ownership changes; the owner holds it
//! for a bounded TTL and may renew it inside a transition window that only it
//! can use, so leadership stays put instead of flapping on every tick.
//!
//! ## Architecture Context
//! This crate holds the backend-agnostic engine:
//! - **Value objects**: [`MutexOwner`], [`MutexState`]
//! - **Contenders**: [`MutexContender`], [`FnContender`], [`MutexRetriever`], id generators
//! - **Period policy**: [`ContendPeriod`] decides when the next tick runs
//! - **Services**: [`ContendService`] and [`RetrievalService`], driven by a
//!   backend [`ContendDriver`] / [`RetrievalDriver`]
//! - **Adapters**: [`SimbaLocker`] (awaitable lock), [`MutexScheduler`] (work while owner)
//!
//! Backends live in `simba-sql`, `simba-redis` and `simba-coordination`.
//!
//! ## Design Decisions
//! - **Assign, then notify**: a new state is stored before the callback for it runs
//! - **Serial dispatch**: callbacks run on a per-service dispatcher task on the
//!   [`HandlerExecutor`], never on the timer task
//! - **Cancellation tokens**: `stop()` ends the timer task in bounded time;
//!   late backend results are discarded

pub mod clock;
pub mod contender;
pub mod error;
pub mod executor;
pub mod id;
pub mod locker;
pub mod notifier;
pub mod owner;
pub mod period;
pub mod retrieval;
pub mod schedule;
pub mod service;
pub mod state;

pub use clock::{current_millis, duration_millis, validate_lease, Clock, ManualClock, SystemClock};
pub use contender::{validate_contender, FnContender, MutexContender, MutexRetriever};
pub use error::{require_not_blank, SimbaError, SimbaResult};
pub use executor::HandlerExecutor;
pub use id::{ContenderIdGenerator, HostContenderIdGenerator, UuidContenderIdGenerator};
pub use locker::SimbaLocker;
pub use notifier::OwnerNotifier;
pub use owner::{MutexOwner, NONE_OWNER_ID};
pub use period::ContendPeriod;
pub use retrieval::{MutexRetrievalServiceFactory, RetrievalDriver, RetrievalService};
pub use schedule::{MutexScheduler, ScheduleConfig, ScheduleStrategy, ScheduledWork};
pub use service::{ContendContext, ContendDriver, ContendService, MutexContendServiceFactory};
pub use state::MutexState;

/// Key prefix shared by every backend.
pub const SIMBA: &str = "simba";
