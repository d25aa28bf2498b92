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

//! Client contract for an ordered-ephemeral-node coordination service.

use async_trait::async_trait;
use simba_core::SimbaResult;
use tokio::sync::oneshot;

/// The slice of a coordination service the leader latch needs.
///
/// Ephemeral nodes are owned by the client's session and vanish with it.
#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    /// Session that owns the ephemeral nodes created through this client.
    fn session_id(&self) -> u64;

    /// Create `{parent}/{prefix}{sequence}` holding `data`; returns the full path.
    /// Missing parents are created.
    async fn create_ephemeral_sequential(&self, parent: &str, prefix: &str, data: &str) -> SimbaResult<String>;

    /// Names (not paths) of the children of `parent`.
    async fn children(&self, parent: &str) -> SimbaResult<Vec<String>>;

    async fn get_data(&self, path: &str) -> SimbaResult<Option<String>>;

    /// Delete `path`; `false` when it did not exist.
    async fn delete(&self, path: &str) -> SimbaResult<bool>;

    /// Resolves once `path` is deleted, immediately if it is already gone.
    async fn watch_deleted(&self, path: &str) -> SimbaResult<oneshot::Receiver<()>>;
}
