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

//! Leader latch over ordered ephemeral nodes.
//!
//! Each participant creates `/simba/{mutex}/{contenderId}-latch-{seq}`. The
//! lowest sequence leads; every other participant watches the node just
//! ahead of its own, so a departure wakes exactly one successor.

use crate::client::CoordinationClient;
use simba_core::{SimbaError, SimbaResult, SIMBA};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

const LATCH_INFIX: &str = "-latch-";

/// Latch root for a mutex.
pub fn mutex_path(mutex: &str) -> String {
    format!("/{SIMBA}/{mutex}")
}

fn sequence_of(name: &str) -> Option<u64> {
    name.rsplit_once(LATCH_INFIX)?.1.parse().ok()
}

/// Where the participant stands after a check.
#[derive(Debug)]
pub enum LatchPosition {
    /// Resolves when our own node disappears.
    Leader(oneshot::Receiver<()>),
    /// Resolves when the predecessor disappears.
    Follower(oneshot::Receiver<()>),
    /// Our node is gone; the participant must rejoin.
    Lost,
}

/// One participant in the election for a mutex.
pub struct LeaderLatch {
    client: Arc<dyn CoordinationClient>,
    path: String,
    participant_id: String,
    node: Mutex<Option<String>>,
}

impl LeaderLatch {
    pub fn new(client: Arc<dyn CoordinationClient>, mutex: &str, participant_id: &str) -> Self {
        Self {
            client,
            path: mutex_path(mutex),
            participant_id: participant_id.to_string(),
            node: Mutex::new(None),
        }
    }

    /// Join the election by creating our node. Replaces any previous node.
    pub async fn join(&self) -> SimbaResult<String> {
        let prefix = format!("{}{LATCH_INFIX}", self.participant_id);
        let created = self
            .client
            .create_ephemeral_sequential(&self.path, &prefix, &self.participant_id)
            .await?;
        debug!(node = %created, "latch joined");
        let previous = self.node.lock().await.replace(created.clone());
        if let Some(previous) = previous {
            if let Err(e) = self.client.delete(&previous).await {
                warn!(node = %previous, error = %e, "failed to delete previous latch node");
            }
        }
        Ok(created)
    }

    /// Compare our node against the current children.
    pub async fn check(&self) -> SimbaResult<LatchPosition> {
        let Some(node) = self.node.lock().await.clone() else {
            return Err(SimbaError::IllegalState("latch has not joined".to_string()));
        };
        let mut participants: Vec<(u64, String)> = self
            .client
            .children(&self.path)
            .await?
            .into_iter()
            .filter_map(|name| sequence_of(&name).map(|seq| (seq, name)))
            .collect();
        participants.sort();

        let own_name = node.rsplit('/').next().unwrap_or_default();
        let Some(index) = participants.iter().position(|(_, name)| name == own_name) else {
            return Ok(LatchPosition::Lost);
        };
        if index == 0 {
            let watch = self.client.watch_deleted(&node).await?;
            return Ok(LatchPosition::Leader(watch));
        }
        let predecessor = format!("{}/{}", self.path, participants[index - 1].1);
        let watch = self.client.watch_deleted(&predecessor).await?;
        Ok(LatchPosition::Follower(watch))
    }

    /// Leave the election. Returns whether a node was removed.
    pub async fn close(&self) -> SimbaResult<bool> {
        let Some(node) = self.node.lock().await.take() else {
            return Ok(false);
        };
        self.client.delete(&node).await
    }

    /// Participant id of the current leader, if any.
    pub async fn leader_id(&self) -> SimbaResult<Option<String>> {
        let mut participants: Vec<(u64, String)> = self
            .client
            .children(&self.path)
            .await?
            .into_iter()
            .filter_map(|name| sequence_of(&name).map(|seq| (seq, name)))
            .collect();
        participants.sort();
        match participants.first() {
            Some((_, name)) => self.client.get_data(&format!("{}/{name}", self.path)).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCoordinationClient, MemoryCoordinationServer};
    use async_trait::async_trait;

    /// Delegates to a memory client but fails every delete.
    struct StickyNodes(MemoryCoordinationClient);

    #[async_trait]
    impl CoordinationClient for StickyNodes {
        fn session_id(&self) -> u64 {
            self.0.session_id()
        }

        async fn create_ephemeral_sequential(&self, parent: &str, prefix: &str, data: &str) -> SimbaResult<String> {
            self.0.create_ephemeral_sequential(parent, prefix, data).await
        }

        async fn children(&self, parent: &str) -> SimbaResult<Vec<String>> {
            self.0.children(parent).await
        }

        async fn get_data(&self, path: &str) -> SimbaResult<Option<String>> {
            self.0.get_data(path).await
        }

        async fn delete(&self, path: &str) -> SimbaResult<bool> {
            Err(SimbaError::Backend(format!("delete {path} refused")))
        }

        async fn watch_deleted(&self, path: &str) -> SimbaResult<oneshot::Receiver<()>> {
            self.0.watch_deleted(path).await
        }
    }

    #[test]
    fn test_sequence_parsing() {
        assert_eq!(sequence_of("a-latch-0000000007"), Some(7));
        assert_eq!(sequence_of("1:42@10.0.0.1-latch-0000000012"), Some(12));
        assert_eq!(sequence_of("stray"), None);
        assert_eq!(mutex_path("orders"), "/simba/orders");
    }

    #[tokio::test]
    async fn test_lowest_sequence_leads_and_successor_is_promoted() {
        let server = MemoryCoordinationServer::new();
        let client: Arc<dyn CoordinationClient> = Arc::new(server.connect().await);
        let first = LeaderLatch::new(client.clone(), "m", "a");
        let second = LeaderLatch::new(client.clone(), "m", "b");
        first.join().await.unwrap();
        second.join().await.unwrap();

        assert!(matches!(first.check().await.unwrap(), LatchPosition::Leader(_)));
        let LatchPosition::Follower(watch) = second.check().await.unwrap() else {
            panic!("second participant should follow");
        };
        assert_eq!(second.leader_id().await.unwrap().as_deref(), Some("a"));

        assert!(first.close().await.unwrap());
        watch.await.unwrap();
        assert!(matches!(second.check().await.unwrap(), LatchPosition::Leader(_)));
        assert!(!first.close().await.unwrap());
        assert!(matches!(first.check().await, Err(SimbaError::IllegalState(_))));
    }

    #[tokio::test]
    async fn test_rejoin_replaces_previous_node() {
        let server = MemoryCoordinationServer::new();
        let client: Arc<dyn CoordinationClient> = Arc::new(server.connect().await);
        let latch = LeaderLatch::new(client.clone(), "rejoin", "a");
        let first = latch.join().await.unwrap();
        let second = latch.join().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(client.children(&mutex_path("rejoin")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejoin_survives_failed_cleanup() {
        let server = MemoryCoordinationServer::new();
        let client: Arc<dyn CoordinationClient> = Arc::new(StickyNodes(server.connect().await));
        let latch = LeaderLatch::new(client.clone(), "sticky", "a");
        latch.join().await.unwrap();
        let current = latch.join().await.unwrap();

        let children = client.children(&mutex_path("sticky")).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.iter().any(|name| current.ends_with(name.as_str())));
    }
}
