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

//! # Simba SQL Backend
//!
//! ## Purpose
//! Relational implementation of the mutex protocol. One row per mutex holds
//! the owner and its windows; acquisition is a single conditional `UPDATE`
//! evaluated against the database clock, so contenders never compare their
//! own wall clocks.
//!
//! ## Backend Support
//! - **InMemory**: [`memory::MemoryMutexOwnerRepository`] (always available, injectable clock)
//! - **SQLite**: [`sqlite::SqliteMutexOwnerRepository`] (feature: `sqlite-backend`)
//!
//! ## Examples
//! ```rust,no_run
//! use simba_core::{FnContender, MutexContendServiceFactory};
//! use simba_sql::{memory::MemoryMutexOwnerRepository, SqlConfig, SqlContendServiceFactory};
//! use std::sync::Arc;
//!
//! # async fn example() -> simba_core::SimbaResult<()> {
//! let factory = SqlContendServiceFactory::new(Arc::new(MemoryMutexOwnerRepository::new()), SqlConfig::default())?;
//! let service = factory.create_mutex_contend_service(Arc::new(FnContender::new("orders")?))?;
//! service.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod memory;
pub mod repository;
pub mod service;
#[cfg(feature = "sqlite-backend")]
pub mod sqlite;

pub use config::SqlConfig;
pub use repository::{AcquireOutcome, MutexOwnerEntity, MutexOwnerRepository, MUTEX_TABLE};
pub use service::{SqlContendDriver, SqlContendServiceFactory, SqlRetrievalDriver};
