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

//! Coordination backend contention over the in-memory ensemble.

use simba_coordination::{CoordinationClient, CoordinationContendServiceFactory, MemoryCoordinationServer};
use simba_core::{FnContender, MutexContendServiceFactory, MutexState};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

type Events = mpsc::UnboundedReceiver<(String, bool, MutexState)>;

fn contender(mutex: &str, id: &str, tx: mpsc::UnboundedSender<(String, bool, MutexState)>) -> Arc<FnContender> {
    let acquired = tx.clone();
    let (acquired_id, released_id) = (id.to_string(), id.to_string());
    Arc::new(
        FnContender::with_id(mutex, id)
            .unwrap()
            .on_acquired(move |s| {
                let _ = acquired.send((acquired_id.clone(), true, s));
            })
            .on_released(move |s| {
                let _ = tx.send((released_id.clone(), false, s));
            }),
    )
}

async fn next(rx: &mut Events) -> (String, bool, MutexState) {
    timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_leader_has_unbounded_windows_and_stop_promotes_follower() {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();
    let server = MemoryCoordinationServer::new();
    let factory = CoordinationContendServiceFactory::new(Arc::new(server.connect().await));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let a = factory.create_mutex_contend_service(contender("zk", "a", tx.clone())).unwrap();
    a.start().await.unwrap();
    let (id, acquired, state) = next(&mut rx).await;
    assert_eq!((id.as_str(), acquired), ("a", true));
    assert_eq!(state.after().ttl_at(), i64::MAX);
    assert_eq!(state.after().transition_at(), i64::MAX);

    let b = factory.create_mutex_contend_service(contender("zk", "b", tx.clone())).unwrap();
    b.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert!(!b.is_owner());

    a.stop().await.unwrap();
    let mut events = vec![next(&mut rx).await, next(&mut rx).await];
    events.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!((events[0].0.as_str(), events[0].1), ("a", false));
    assert_eq!((events[1].0.as_str(), events[1].1), ("b", true));

    b.stop().await.unwrap();
    let (id, acquired, _) = next(&mut rx).await;
    assert_eq!((id.as_str(), acquired), ("b", false));
}

#[tokio::test]
async fn test_session_expiry_moves_leadership() {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();
    let server = MemoryCoordinationServer::new();
    let doomed_client = server.connect().await;
    let doomed_session = doomed_client.session_id();
    let doomed = CoordinationContendServiceFactory::new(Arc::new(doomed_client));
    let healthy = CoordinationContendServiceFactory::new(Arc::new(server.connect().await));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let a = doomed.create_mutex_contend_service(contender("expiry", "a", tx.clone())).unwrap();
    a.start().await.unwrap();
    assert_eq!(next(&mut rx).await.0, "a");

    let b = healthy.create_mutex_contend_service(contender("expiry", "b", tx.clone())).unwrap();
    b.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    server.expire_session(doomed_session).await;
    let mut events = vec![next(&mut rx).await, next(&mut rx).await];
    events.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!((events[0].0.as_str(), events[0].1), ("a", false));
    assert_eq!((events[1].0.as_str(), events[1].1), ("b", true));
    assert!(b.is_owner());
    assert!(!a.is_owner());

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}
