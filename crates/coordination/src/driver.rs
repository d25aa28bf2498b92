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

//! Contend driver over the leader latch.

use crate::client::CoordinationClient;
use crate::latch::{LatchPosition, LeaderLatch};
use async_trait::async_trait;
use simba_core::{
    ContendContext, ContendDriver, ContendService, HandlerExecutor, MutexContendServiceFactory, MutexContender,
    MutexOwner, SimbaResult,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const BACKEND: &str = "coordination";

/// Pause before rejoining after a failed coordination call.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Leadership is held for as long as our latch node lives, so there is no
/// renewal timer: the loop only waits on node deletions.
pub struct CoordinationContendDriver {
    latch: LeaderLatch,
}

impl CoordinationContendDriver {
    pub fn new(client: Arc<dyn CoordinationClient>, mutex: &str, contender_id: &str) -> Self {
        Self {
            latch: LeaderLatch::new(client, mutex, contender_id),
        }
    }

    fn not_leader(ctx: &ContendContext) {
        if ctx.is_owner() {
            ctx.notify_owner(MutexOwner::NONE);
        }
    }
}

#[async_trait]
impl ContendDriver for CoordinationContendDriver {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn run_contend(&self, ctx: ContendContext) {
        let retry_ms = RETRY_DELAY.as_millis() as u64;
        let mut joined = false;
        while !ctx.is_cancelled() {
            if !joined {
                if let Err(e) = self.latch.join().await {
                    metrics::counter!("simba_backend_errors_total", "backend" => BACKEND).increment(1);
                    warn!(mutex = %ctx.mutex(), contender_id = %ctx.contender_id(), error = %e, "latch join failed");
                    if !ctx.sleep(retry_ms).await {
                        return;
                    }
                    continue;
                }
                joined = true;
            }
            match self.latch.check().await {
                Ok(LatchPosition::Leader(lost)) => {
                    info!("Contender {} is leader of mutex {}", ctx.contender_id(), ctx.mutex());
                    ctx.notify_owner(MutexOwner::leader(ctx.contender_id()));
                    tokio::select! {
                        _ = ctx.cancelled() => return,
                        _ = lost => {
                            warn!(mutex = %ctx.mutex(), contender_id = %ctx.contender_id(), "latch node lost, leadership revoked");
                            Self::not_leader(&ctx);
                            joined = false;
                        }
                    }
                }
                Ok(LatchPosition::Follower(predecessor_gone)) => {
                    Self::not_leader(&ctx);
                    debug!(mutex = %ctx.mutex(), contender_id = %ctx.contender_id(), "waiting on predecessor");
                    tokio::select! {
                        _ = ctx.cancelled() => return,
                        _ = predecessor_gone => {}
                    }
                }
                Ok(LatchPosition::Lost) => {
                    Self::not_leader(&ctx);
                    joined = false;
                }
                Err(e) => {
                    metrics::counter!("simba_backend_errors_total", "backend" => BACKEND).increment(1);
                    warn!(mutex = %ctx.mutex(), contender_id = %ctx.contender_id(), error = %e, "latch check failed");
                    Self::not_leader(&ctx);
                    joined = false;
                    if !ctx.sleep(retry_ms).await {
                        return;
                    }
                }
            }
        }
    }

    async fn stop_contend(&self, ctx: &ContendContext) -> SimbaResult<()> {
        let removed = self.latch.close().await?;
        debug!(mutex = %ctx.mutex(), contender_id = %ctx.contender_id(), removed, "latch closed");
        Ok(())
    }
}

/// Builds coordination-backed contend services sharing one client session.
#[derive(Clone)]
pub struct CoordinationContendServiceFactory {
    client: Arc<dyn CoordinationClient>,
    executor: HandlerExecutor,
}

impl CoordinationContendServiceFactory {
    pub fn new(client: Arc<dyn CoordinationClient>) -> Self {
        Self::with_executor(client, HandlerExecutor::ambient())
    }

    pub fn with_executor(client: Arc<dyn CoordinationClient>, executor: HandlerExecutor) -> Self {
        Self { client, executor }
    }
}

impl MutexContendServiceFactory for CoordinationContendServiceFactory {
    fn create_mutex_contend_service(&self, contender: Arc<dyn MutexContender>) -> SimbaResult<ContendService> {
        let driver = CoordinationContendDriver::new(self.client.clone(), contender.mutex(), contender.contender_id());
        ContendService::new(contender, Arc::new(driver), self.executor.clone())
    }
}
