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

//! Callback capabilities registered with a service.
//!
//! A [`MutexRetriever`] is told about every observed owner transition. A
//! [`MutexContender`] additionally carries an identity and is told only when
//! it gains or loses ownership.

use crate::error::{require_not_blank, SimbaResult};
use crate::id::{ContenderIdGenerator, HostContenderIdGenerator};
use crate::state::MutexState;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Observer of a mutex's owner.
pub trait MutexRetriever: Send + Sync + 'static {
    /// Mutex name.
    fn mutex(&self) -> &str;

    /// Called on the handler executor for every published state.
    fn notify_owner(&self, state: MutexState);
}

/// Participant in a mutex contention.
pub trait MutexContender: Send + Sync + 'static {
    /// Mutex name.
    fn mutex(&self) -> &str;

    /// Unique id of this contender on its mutex.
    fn contender_id(&self) -> &str;

    /// This contender became owner.
    fn on_acquired(&self, state: MutexState) {
        info!(
            mutex = %self.mutex(),
            contender_id = %self.contender_id(),
            owner_id = %state.after().owner_id(),
            "onAcquired"
        );
    }

    /// This contender stopped being owner.
    fn on_released(&self, state: MutexState) {
        info!(
            mutex = %self.mutex(),
            contender_id = %self.contender_id(),
            owner_id = %state.after().owner_id(),
            "onReleased"
        );
    }
}

/// Checks the identity of a contender before a service is built for it.
pub fn validate_contender(contender: &dyn MutexContender) -> SimbaResult<()> {
    require_not_blank(contender.mutex(), "mutex")?;
    require_not_blank(contender.contender_id(), "contenderId")
}

/// Adapts a contender into a retriever whose notifications fire the
/// acquired / released hooks.
pub(crate) struct ContenderRetriever {
    contender: Arc<dyn MutexContender>,
}

impl ContenderRetriever {
    pub(crate) fn new(contender: Arc<dyn MutexContender>) -> Self {
        Self { contender }
    }
}

impl MutexRetriever for ContenderRetriever {
    fn mutex(&self) -> &str {
        self.contender.mutex()
    }

    fn notify_owner(&self, state: MutexState) {
        let contender_id = self.contender.contender_id();
        if state.is_acquired(contender_id) {
            self.contender.on_acquired(state);
        } else if state.is_released(contender_id) {
            self.contender.on_released(state);
        }
    }
}

type Hook = Box<dyn Fn(MutexState) + Send + Sync>;

/// Contender built from closures.
///
/// ## Example
/// ```rust
/// use simba_core::FnContender;
///
/// let contender = FnContender::new("orders")
///     .unwrap()
///     .on_acquired(|state| println!("leading since {}", state.after().acquired_at()))
///     .on_released(|_| println!("stepped down"));
/// assert_eq!(contender.mutex(), "orders");
/// ```
pub struct FnContender {
    mutex: String,
    contender_id: String,
    acquired: Option<Hook>,
    released: Option<Hook>,
}

impl FnContender {
    /// Contender on `mutex` with an id from [`HostContenderIdGenerator`].
    pub fn new(mutex: impl Into<String>) -> SimbaResult<Self> {
        let contender_id = HostContenderIdGenerator::shared().generate()?;
        Self::with_id(mutex, contender_id)
    }

    /// Contender on `mutex` with an explicit id.
    pub fn with_id(mutex: impl Into<String>, contender_id: impl Into<String>) -> SimbaResult<Self> {
        let mutex = mutex.into();
        let contender_id = contender_id.into();
        require_not_blank(&mutex, "mutex")?;
        require_not_blank(&contender_id, "contenderId")?;
        Ok(Self {
            mutex,
            contender_id,
            acquired: None,
            released: None,
        })
    }

    pub fn on_acquired(mut self, hook: impl Fn(MutexState) + Send + Sync + 'static) -> Self {
        self.acquired = Some(Box::new(hook));
        self
    }

    pub fn on_released(mut self, hook: impl Fn(MutexState) + Send + Sync + 'static) -> Self {
        self.released = Some(Box::new(hook));
        self
    }

    pub fn mutex(&self) -> &str {
        &self.mutex
    }

    pub fn contender_id(&self) -> &str {
        &self.contender_id
    }
}

impl fmt::Debug for FnContender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnContender")
            .field("mutex", &self.mutex)
            .field("contender_id", &self.contender_id)
            .finish()
    }
}

impl MutexContender for FnContender {
    fn mutex(&self) -> &str {
        &self.mutex
    }

    fn contender_id(&self) -> &str {
        &self.contender_id
    }

    fn on_acquired(&self, state: MutexState) {
        info!(mutex = %self.mutex, contender_id = %self.contender_id, "onAcquired");
        if let Some(hook) = &self.acquired {
            hook(state);
        }
    }

    fn on_released(&self, state: MutexState) {
        info!(mutex = %self.mutex, contender_id = %self.contender_id, "onReleased");
        if let Some(hook) = &self.released {
            hook(state);
        }
    }
}
