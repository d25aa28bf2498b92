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

//! Owner-change notification pipeline.
//!
//! Observations arrive from several sources (timer ticks, pub/sub messages,
//! coordination callbacks). Each one goes through [`OwnerNotifier::notify_owner`]:
//!
//! 1. `new_state = (current.after, new_owner)` is built and stored in one
//!    atomic step on the state watch channel.
//! 2. The stored state is queued to a per-service dispatcher running on the
//!    [`HandlerExecutor`].
//! 3. The dispatcher hands states to the retriever strictly in publication
//!    order and contains any panic raised by user code.

use crate::contender::MutexRetriever;
use crate::executor::HandlerExecutor;
use crate::owner::MutexOwner;
use crate::state::MutexState;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

/// Publishes owner observations for one service.
#[derive(Clone)]
pub struct OwnerNotifier {
    mutex: Arc<str>,
    state: Arc<watch::Sender<MutexState>>,
    dispatch: mpsc::UnboundedSender<MutexState>,
}

impl OwnerNotifier {
    /// Creates the notifier and the receiving end consumed by [`run_dispatcher`].
    pub(crate) fn new(mutex: &str) -> (Self, mpsc::UnboundedReceiver<MutexState>) {
        let (state, _) = watch::channel(MutexState::NONE);
        let (dispatch, rx) = mpsc::unbounded_channel();
        let notifier = Self {
            mutex: Arc::from(mutex),
            state: Arc::new(state),
            dispatch,
        };
        (notifier, rx)
    }

    /// Publish `owner` as the new `after` and schedule callback dispatch.
    ///
    /// Returns the published state.
    pub fn notify_owner(&self, owner: MutexOwner) -> MutexState {
        let mut published = MutexState::NONE;
        self.state.send_modify(|current| {
            let next = MutexState::new(current.after().clone(), owner);
            published = next.clone();
            *current = next;
        });
        debug!(
            mutex = %self.mutex,
            before = %published.before().owner_id(),
            after = %published.after().owner_id(),
            "notifyOwner"
        );
        if self.dispatch.send(published.clone()).is_err() {
            debug!(mutex = %self.mutex, "dispatcher gone, dropping notification");
        }
        published
    }

    /// Clears the state to `(NONE, NONE)` without notifying.
    pub(crate) fn reset(&self) {
        self.state.send_replace(MutexState::NONE);
    }

    pub fn mutex_state(&self) -> MutexState {
        self.state.borrow().clone()
    }

    pub fn after_owner(&self) -> MutexOwner {
        self.state.borrow().after().clone()
    }

    /// Watch every published state.
    pub fn subscribe(&self) -> watch::Receiver<MutexState> {
        self.state.subscribe()
    }
}

/// Spawn the dispatcher on `executor`. It ends once every notifier is dropped.
pub(crate) fn spawn_dispatcher(
    executor: &HandlerExecutor,
    rx: mpsc::UnboundedReceiver<MutexState>,
    retriever: Arc<dyn MutexRetriever>,
) {
    executor.spawn(run_dispatcher(rx, retriever));
}

async fn run_dispatcher(mut rx: mpsc::UnboundedReceiver<MutexState>, retriever: Arc<dyn MutexRetriever>) {
    while let Some(state) = rx.recv().await {
        let target = retriever.clone();
        let outcome = AssertUnwindSafe(async move { target.notify_owner(state) })
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(mutex = %retriever.mutex(), error = %reason, "safeNotifyOwner failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::{timeout, Duration};

    struct Recorder {
        seen: Mutex<Vec<MutexState>>,
        tx: mpsc::UnboundedSender<()>,
        panic_on: Option<String>,
    }

    impl MutexRetriever for Recorder {
        fn mutex(&self) -> &str {
            "m"
        }

        fn notify_owner(&self, state: MutexState) {
            if let Some(id) = &self.panic_on {
                if state.after().owner_id() == id {
                    panic!("callback failure");
                }
            }
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(state);
            }
            let _ = self.tx.send(());
        }
    }

    fn owner(id: &str) -> MutexOwner {
        MutexOwner::new(id, 0, 10, 20)
    }

    #[tokio::test]
    async fn test_states_chain_before_to_previous_after() {
        let (notifier, rx) = OwnerNotifier::new("m");
        let (tx, mut done) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            tx,
            panic_on: None,
        });
        spawn_dispatcher(&HandlerExecutor::ambient(), rx, recorder.clone());

        let first = notifier.notify_owner(owner("a"));
        assert_eq!(notifier.mutex_state(), first);
        notifier.notify_owner(owner("b"));
        notifier.notify_owner(MutexOwner::NONE);

        for _ in 0..3 {
            timeout(Duration::from_secs(1), done.recv()).await.unwrap();
        }
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].before(), &MutexOwner::NONE);
        for pair in seen.windows(2) {
            assert_eq!(pair[1].before(), pair[0].after());
        }
        assert_eq!(notifier.after_owner(), MutexOwner::NONE);
    }

    #[tokio::test]
    async fn test_callback_panic_does_not_stop_dispatch() {
        let (notifier, rx) = OwnerNotifier::new("m");
        let (tx, mut done) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            tx,
            panic_on: Some("boom".to_string()),
        });
        spawn_dispatcher(&HandlerExecutor::ambient(), rx, recorder.clone());

        notifier.notify_owner(owner("boom"));
        notifier.notify_owner(owner("ok"));
        timeout(Duration::from_secs(1), done.recv()).await.unwrap();

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].after().owner_id(), "ok");
        assert_eq!(seen[0].before().owner_id(), "boom");
    }

    #[tokio::test]
    async fn test_subscribe_sees_published_state() {
        let (notifier, _rx) = OwnerNotifier::new("m");
        let mut watch = notifier.subscribe();
        notifier.notify_owner(owner("a"));
        watch.changed().await.unwrap();
        assert_eq!(watch.borrow().after().owner_id(), "a");
        notifier.reset();
        assert_eq!(notifier.mutex_state(), MutexState::NONE);
    }
}
