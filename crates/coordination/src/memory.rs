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

//! In-memory coordination server.
//!
//! Keeps a flat node map with per-parent sequence counters, ephemeral
//! ownership by session and one-shot deletion watches. Expiring a session
//! deletes its nodes and fires their watches, as a real ensemble would after a
//! session timeout.

use crate::client::CoordinationClient;
use async_trait::async_trait;
use simba_core::{SimbaError, SimbaResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};

#[derive(Debug)]
struct Node {
    data: String,
    session: u64,
}

#[derive(Default)]
struct Ensemble {
    nodes: BTreeMap<String, Node>,
    sequences: HashMap<String, u64>,
    watches: HashMap<String, Vec<oneshot::Sender<()>>>,
    live_sessions: HashSet<u64>,
}

impl Ensemble {
    fn remove(&mut self, path: &str) -> bool {
        let removed = self.nodes.remove(path).is_some();
        if let Some(watchers) = self.watches.remove(path) {
            for watcher in watchers {
                let _ = watcher.send(());
            }
        }
        removed
    }

    fn check_session(&self, session: u64) -> SimbaResult<()> {
        if !self.live_sessions.contains(&session) {
            return Err(SimbaError::Backend(format!("session 0x{session:x} expired")));
        }
        Ok(())
    }
}

/// Shared in-memory ensemble; hand out one client per simulated process.
#[derive(Clone, Default)]
pub struct MemoryCoordinationServer {
    ensemble: Arc<Mutex<Ensemble>>,
    next_session: Arc<AtomicU64>,
}

impl MemoryCoordinationServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session.
    pub async fn connect(&self) -> MemoryCoordinationClient {
        let session = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        self.ensemble.lock().await.live_sessions.insert(session);
        debug!(session, "session opened");
        MemoryCoordinationClient {
            server: self.clone(),
            session,
        }
    }

    /// Expire `session`: its ephemeral nodes are deleted and watchers fire.
    pub async fn expire_session(&self, session: u64) {
        let mut ensemble = self.ensemble.lock().await;
        ensemble.live_sessions.remove(&session);
        let owned: Vec<String> = ensemble
            .nodes
            .iter()
            .filter(|(_, node)| node.session == session)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            ensemble.remove(path);
        }
        info!(session, deleted = owned.len(), "session expired");
    }
}

/// One session on a [`MemoryCoordinationServer`].
#[derive(Clone)]
pub struct MemoryCoordinationClient {
    server: MemoryCoordinationServer,
    session: u64,
}

fn child_prefix(parent: &str) -> String {
    format!("{}/", parent.trim_end_matches('/'))
}

#[async_trait]
impl CoordinationClient for MemoryCoordinationClient {
    fn session_id(&self) -> u64 {
        self.session
    }

    async fn create_ephemeral_sequential(&self, parent: &str, prefix: &str, data: &str) -> SimbaResult<String> {
        let mut ensemble = self.server.ensemble.lock().await;
        ensemble.check_session(self.session)?;
        let sequence = ensemble.sequences.entry(parent.to_string()).or_insert(0);
        let path = format!("{}{prefix}{:010}", child_prefix(parent), *sequence);
        *sequence += 1;
        ensemble.nodes.insert(
            path.clone(),
            Node {
                data: data.to_string(),
                session: self.session,
            },
        );
        Ok(path)
    }

    async fn children(&self, parent: &str) -> SimbaResult<Vec<String>> {
        let ensemble = self.server.ensemble.lock().await;
        ensemble.check_session(self.session)?;
        let prefix = child_prefix(parent);
        Ok(ensemble
            .nodes
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn get_data(&self, path: &str) -> SimbaResult<Option<String>> {
        let ensemble = self.server.ensemble.lock().await;
        ensemble.check_session(self.session)?;
        Ok(ensemble.nodes.get(path).map(|node| node.data.clone()))
    }

    async fn delete(&self, path: &str) -> SimbaResult<bool> {
        let mut ensemble = self.server.ensemble.lock().await;
        ensemble.check_session(self.session)?;
        Ok(ensemble.remove(path))
    }

    async fn watch_deleted(&self, path: &str) -> SimbaResult<oneshot::Receiver<()>> {
        let mut ensemble = self.server.ensemble.lock().await;
        ensemble.check_session(self.session)?;
        let (tx, rx) = oneshot::channel();
        if ensemble.nodes.contains_key(path) {
            ensemble.watches.entry(path.to_string()).or_default().push(tx);
        } else {
            let _ = tx.send(());
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequential_children_and_delete_watch() {
        let server = MemoryCoordinationServer::new();
        let client = server.connect().await;

        let first = client.create_ephemeral_sequential("/simba/m", "a-latch-", "a").await.unwrap();
        let second = client.create_ephemeral_sequential("/simba/m", "b-latch-", "b").await.unwrap();
        assert_eq!(first, "/simba/m/a-latch-0000000000");
        assert_eq!(second, "/simba/m/b-latch-0000000001");
        assert_eq!(client.children("/simba/m").await.unwrap().len(), 2);
        assert_eq!(client.get_data(&second).await.unwrap().as_deref(), Some("b"));

        let watch = client.watch_deleted(&first).await.unwrap();
        assert!(client.delete(&first).await.unwrap());
        watch.await.unwrap();
        assert!(!client.delete(&first).await.unwrap());
        client.watch_deleted(&first).await.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_session_loses_nodes() {
        let server = MemoryCoordinationServer::new();
        let doomed = server.connect().await;
        let survivor = server.connect().await;

        let path = doomed.create_ephemeral_sequential("/simba/m", "x-latch-", "x").await.unwrap();
        let watch = survivor.watch_deleted(&path).await.unwrap();
        server.expire_session(doomed.session_id()).await;

        watch.await.unwrap();
        assert!(survivor.children("/simba/m").await.unwrap().is_empty());
        assert!(doomed.children("/simba/m").await.is_err());
    }
}
