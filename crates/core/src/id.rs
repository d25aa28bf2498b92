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

//! Contender id generation.

use crate::error::{SimbaError, SimbaResult};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use uuid::Uuid;

/// Produces unique contender ids.
pub trait ContenderIdGenerator: Send + Sync {
    fn generate(&self) -> SimbaResult<String>;
}

/// 32 hex characters, no separators.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidContenderIdGenerator;

impl ContenderIdGenerator for UuidContenderIdGenerator {
    fn generate(&self) -> SimbaResult<String> {
        Ok(Uuid::new_v4().simple().to_string())
    }
}

/// `{seq}:{pid}@{host_address}` with a process-local monotonic `seq`.
#[derive(Debug, Default)]
pub struct HostContenderIdGenerator {
    counter: AtomicU64,
}

impl HostContenderIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance, so `seq` is unique across the process.
    pub fn shared() -> &'static HostContenderIdGenerator {
        static SHARED: OnceLock<HostContenderIdGenerator> = OnceLock::new();
        SHARED.get_or_init(HostContenderIdGenerator::new)
    }
}

impl ContenderIdGenerator for HostContenderIdGenerator {
    fn generate(&self) -> SimbaResult<String> {
        let address = local_address()?;
        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}:{}@{}", seq, std::process::id(), address))
    }
}

/// Address of the interface used for outbound traffic, falling back to
/// loopback on hosts without a route. Connecting a UDP socket sends nothing.
fn local_address() -> SimbaResult<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .map_err(|e| SimbaError::IllegalState(format!("failed to resolve host address: {e}")))?;
    let routed = socket
        .connect((Ipv4Addr::new(10, 255, 255, 255), 1))
        .and_then(|_| socket.local_addr())
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified());
    Ok(routed.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_generator() {
        let id = UuidContenderIdGenerator.generate().unwrap();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, UuidContenderIdGenerator.generate().unwrap());
    }

    #[test]
    fn test_host_generator_sequence() {
        let generator = HostContenderIdGenerator::new();
        let first = generator.generate().unwrap();
        let second = generator.generate().unwrap();
        let pid = std::process::id().to_string();
        assert!(first.starts_with(&format!("0:{pid}@")));
        assert!(second.starts_with(&format!("1:{pid}@")));
    }
}
