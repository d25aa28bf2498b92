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

//! ZooKeeper-backed coordination client.
//!
//! Nodes are created with open ACLs. Parents are created as persistent nodes on
//! first use; the latch nodes themselves are ephemeral sequential and vanish
//! with the session.

use crate::client::CoordinationClient;
use async_trait::async_trait;
use simba_core::{SimbaError, SimbaResult};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};
use zookeeper_client as zk;

/// How long [`ZookeeperCoordinationClient::connect`] waits for a session.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn backend(context: &'static str) -> impl FnOnce(zk::Error) -> SimbaError {
    move |e| SimbaError::Backend(format!("ZooKeeper {context} failed: {e}"))
}

/// One ZooKeeper session.
#[derive(Clone)]
pub struct ZookeeperCoordinationClient {
    client: zk::Client,
    session: u64,
}

impl ZookeeperCoordinationClient {
    /// Connect to `cluster`, e.g. `localhost:2181` or `zk1:2181,zk2:2181/chroot`.
    pub async fn connect(cluster: &str) -> SimbaResult<Self> {
        let client = tokio::time::timeout(CONNECT_TIMEOUT, zk::Client::connect(cluster))
            .await
            .map_err(|_| SimbaError::Backend(format!("ZooKeeper connect to {cluster} timed out")))?
            .map_err(backend("connect"))?;
        let (session, _) = client.session();
        let session = session.0 as u64;
        debug!(cluster, session, "zookeeper session opened");
        Ok(Self { client, session })
    }

    async fn ensure_parents(&self, parent: &str) -> SimbaResult<()> {
        let options = zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all());
        let mut path = String::new();
        for segment in parent.split('/').filter(|s| !s.is_empty()) {
            path.push('/');
            path.push_str(segment);
            match self.client.create(&path, &[], &options).await {
                Ok(_) | Err(zk::Error::NodeExists) => {}
                Err(e) => return Err(backend("create parent")(e)),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationClient for ZookeeperCoordinationClient {
    fn session_id(&self) -> u64 {
        self.session
    }

    #[instrument(skip(self, data))]
    async fn create_ephemeral_sequential(&self, parent: &str, prefix: &str, data: &str) -> SimbaResult<String> {
        let parent = parent.trim_end_matches('/');
        self.ensure_parents(parent).await?;
        let base = format!("{parent}/{prefix}");
        let options = zk::CreateMode::EphemeralSequential.with_acls(zk::Acls::anyone_all());
        let (_, sequence) = self
            .client
            .create(&base, data.as_bytes(), &options)
            .await
            .map_err(backend("create"))?;
        Ok(format!("{base}{:010}", sequence.0))
    }

    async fn children(&self, parent: &str) -> SimbaResult<Vec<String>> {
        match self.client.get_children(parent.trim_end_matches('/')).await {
            Ok((children, _)) => Ok(children),
            Err(zk::Error::NoNode) => Ok(Vec::new()),
            Err(e) => Err(backend("get children")(e)),
        }
    }

    async fn get_data(&self, path: &str) -> SimbaResult<Option<String>> {
        match self.client.get_data(path).await {
            Ok((data, _)) => Ok(Some(String::from_utf8_lossy(&data).into_owned())),
            Err(zk::Error::NoNode) => Ok(None),
            Err(e) => Err(backend("get data")(e)),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> SimbaResult<bool> {
        match self.client.delete(path, None).await {
            Ok(()) => Ok(true),
            Err(zk::Error::NoNode) => Ok(false),
            Err(e) => Err(backend("delete")(e)),
        }
    }

    async fn watch_deleted(&self, path: &str) -> SimbaResult<oneshot::Receiver<()>> {
        let (tx, rx) = oneshot::channel();
        let (stat, watcher) = self
            .client
            .check_and_watch_stat(path)
            .await
            .map_err(backend("watch"))?;
        if stat.is_none() {
            let _ = tx.send(());
            return Ok(rx);
        }
        let client = self.client.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            let mut watcher = watcher;
            loop {
                let event = watcher.changed().await;
                if event.event_type != zk::EventType::NodeDataChanged {
                    break;
                }
                match client.check_and_watch_stat(&path).await {
                    Ok((Some(_), next)) => watcher = next,
                    Ok((None, _)) => break,
                    Err(e) => {
                        warn!(%path, error = %e, "re-watch failed, treating node as gone");
                        break;
                    }
                }
            }
            let _ = tx.send(());
        });
        Ok(rx)
    }
}
