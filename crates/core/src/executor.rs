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

//! Handler executor for user callbacks.

use std::fmt;
use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Where user callbacks run.
///
/// Callbacks never run on a service's timer task or on a backend I/O task;
/// they run on a dispatcher task spawned through this executor. By default
/// that is the runtime the service is started from. A dedicated runtime can
/// be supplied so slow callbacks cannot starve the protocol.
#[derive(Clone, Default)]
pub struct HandlerExecutor {
    handle: Option<Handle>,
}

impl HandlerExecutor {
    /// Spawn on whichever runtime is current when a task is submitted.
    pub fn ambient() -> Self {
        Self { handle: None }
    }

    /// Spawn on the given runtime.
    pub fn with_handle(handle: Handle) -> Self {
        Self { handle: Some(handle) }
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match &self.handle {
            Some(handle) => handle.spawn(future),
            None => tokio::spawn(future),
        }
    }
}

impl fmt::Debug for HandlerExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerExecutor")
            .field("dedicated", &self.handle.is_some())
            .finish()
    }
}
