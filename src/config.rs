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

//! Environment-driven backend selection.
//!
//! ## Environment Variables
//!
//! - `SIMBA_BACKEND`: `memory-sql` (default), `sqlite`, `redis`, `memory-redis`,
//!   `zookeeper` or `memory-coordination`
//! - `SIMBA_TTL_MS`: lease length in milliseconds (default: 10000)
//! - `SIMBA_TRANSITION_MS`: owner-only renewal window (default: 6000)
//! - `SIMBA_INITIAL_DELAY_MS`: delay before the first tick (default: 0)
//! - `SIMBA_SQLITE_URL`: SQLite URL (default: `sqlite::memory:`)
//! - `SIMBA_REDIS_URL`: Redis URL (default: `redis://127.0.0.1:6379`)
//! - `SIMBA_ZOOKEEPER_URL`: ZooKeeper connect string (default: `127.0.0.1:2181`)
//!
//! ## Examples
//!
//! ```bash
//! # Relational backend on a file database
//! export SIMBA_BACKEND=sqlite
//! export SIMBA_SQLITE_URL=sqlite://simba.db?mode=rwc
//!
//! # Key-value backend with a short lease
//! export SIMBA_BACKEND=redis
//! export SIMBA_REDIS_URL=redis://localhost:6379
//! export SIMBA_TTL_MS=2000
//! export SIMBA_TRANSITION_MS=1000
//!
//! # Leader latch on a ZooKeeper ensemble
//! export SIMBA_BACKEND=zookeeper
//! export SIMBA_ZOOKEEPER_URL=zk1:2181,zk2:2181,zk3:2181
//! ```

use serde::{Deserialize, Serialize};
use simba_coordination::{CoordinationContendServiceFactory, MemoryCoordinationServer};
use simba_core::{MutexContendServiceFactory, SimbaError, SimbaResult};
use simba_redis::{KvConfig, KvContendServiceFactory, MemoryScriptedStore};
use simba_sql::memory::MemoryMutexOwnerRepository;
use simba_sql::{SqlConfig, SqlContendServiceFactory};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DEFAULT_SQLITE_URL: &str = "sqlite::memory:";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_ZOOKEEPER_URL: &str = "127.0.0.1:2181";

/// Which store arbitrates the mutex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendType {
    /// Relational protocol over an in-process table (single process only)
    MemorySql,

    /// Relational protocol over SQLite
    Sqlite {
        /// `sqlx` connection URL
        url: String,
    },

    /// Key-value protocol over Redis
    Redis {
        /// Redis connection URL
        url: String,
    },

    /// Key-value protocol over an in-process scripted store
    MemoryRedis,

    /// Leader latch over a ZooKeeper ensemble
    Zookeeper {
        /// Connect string, optionally with a chroot suffix
        cluster: String,
    },

    /// Leader latch over an in-process coordination server
    MemoryCoordination,
}

impl Default for BackendType {
    fn default() -> Self {
        BackendType::MemorySql
    }
}

impl BackendType {
    /// Short name used in logs and `SIMBA_BACKEND`.
    pub fn name(&self) -> &'static str {
        match self {
            BackendType::MemorySql => "memory-sql",
            BackendType::Sqlite { .. } => "sqlite",
            BackendType::Redis { .. } => "redis",
            BackendType::MemoryRedis => "memory-redis",
            BackendType::Zookeeper { .. } => "zookeeper",
            BackendType::MemoryCoordination => "memory-coordination",
        }
    }
}

/// Backend plus protocol timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimbaConfig {
    /// Store that arbitrates the mutex
    pub backend: BackendType,
    /// Lease length granted by one acquire
    pub ttl: Duration,
    /// Owner-only renewal window after the TTL
    pub transition: Duration,
    /// Delay before the first tick (relational backend)
    pub initial_delay: Duration,
}

impl Default for SimbaConfig {
    fn default() -> Self {
        let sql = SqlConfig::default();
        Self {
            backend: BackendType::default(),
            ttl: sql.ttl,
            transition: sql.transition,
            initial_delay: sql.initial_delay,
        }
    }
}

impl SimbaConfig {
    /// Default timing on `backend`.
    pub fn new(backend: BackendType) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// Override lease timing.
    pub fn with_ttl(mut self, ttl: Duration, transition: Duration) -> Self {
        self.ttl = ttl;
        self.transition = transition;
        self
    }

    /// Override the first-tick delay.
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Load configuration from `SIMBA_*` environment variables.
    ///
    /// ## Examples
    /// ```rust
    /// use simba::SimbaConfig;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = SimbaConfig::from_env()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_env() -> SimbaResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SimbaResult<Self> {
        let backend_str = lookup("SIMBA_BACKEND")
            .unwrap_or_else(|| "memory-sql".to_string())
            .to_lowercase();

        let backend = match backend_str.as_str() {
            "memory-sql" | "memory" => BackendType::MemorySql,
            "sqlite" => BackendType::Sqlite {
                url: lookup("SIMBA_SQLITE_URL").unwrap_or_else(|| DEFAULT_SQLITE_URL.to_string()),
            },
            "redis" => BackendType::Redis {
                url: lookup("SIMBA_REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            },
            "memory-redis" => BackendType::MemoryRedis,
            "zookeeper" => BackendType::Zookeeper {
                cluster: lookup("SIMBA_ZOOKEEPER_URL").unwrap_or_else(|| DEFAULT_ZOOKEEPER_URL.to_string()),
            },
            "memory-coordination" => BackendType::MemoryCoordination,
            other => {
                return Err(SimbaError::Config(format!(
                    "Unknown backend type: {}. Valid options: memory-sql, sqlite, redis, memory-redis, zookeeper, memory-coordination",
                    other
                )));
            }
        };

        let defaults = Self::default();
        let config = Self {
            backend,
            ttl: millis(&lookup, "SIMBA_TTL_MS", defaults.ttl)?,
            transition: millis(&lookup, "SIMBA_TRANSITION_MS", defaults.transition)?,
            initial_delay: millis(&lookup, "SIMBA_INITIAL_DELAY_MS", defaults.initial_delay)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject a zero TTL.
    pub fn validate(&self) -> SimbaResult<()> {
        self.sql_config().validate()
    }

    /// Timing for the relational backend.
    pub fn sql_config(&self) -> SqlConfig {
        SqlConfig {
            initial_delay: self.initial_delay,
            ttl: self.ttl,
            transition: self.transition,
        }
    }

    /// Timing for the key-value backend.
    pub fn kv_config(&self) -> KvConfig {
        KvConfig {
            ttl: self.ttl,
            transition: self.transition,
        }
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> SimbaResult<Duration> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| SimbaError::Config(format!("{key}={raw} is not a millisecond count: {e}"))),
    }
}

/// Build a contend service factory from `SIMBA_*` environment variables.
pub async fn create_contend_service_factory_from_env() -> SimbaResult<Arc<dyn MutexContendServiceFactory>> {
    let config = SimbaConfig::from_env()?;
    create_contend_service_factory(config).await
}

/// Build a contend service factory for `config.backend`.
///
/// ## Examples
/// ```rust
/// use simba::{create_contend_service_factory, BackendType, SimbaConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let factory = create_contend_service_factory(SimbaConfig::new(BackendType::MemorySql)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn create_contend_service_factory(
    config: SimbaConfig,
) -> SimbaResult<Arc<dyn MutexContendServiceFactory>> {
    config.validate()?;
    info!(
        backend = config.backend.name(),
        ttl_ms = config.ttl.as_millis() as u64,
        transition_ms = config.transition.as_millis() as u64,
        "creating contend service factory"
    );

    match &config.backend {
        BackendType::MemorySql => {
            let repository = Arc::new(MemoryMutexOwnerRepository::new());
            Ok(Arc::new(SqlContendServiceFactory::new(repository, config.sql_config())?))
        }

        #[cfg(feature = "sqlite-backend")]
        BackendType::Sqlite { url } => {
            use simba_sql::sqlite::SqliteMutexOwnerRepository;
            let repository = Arc::new(SqliteMutexOwnerRepository::new(url).await?);
            Ok(Arc::new(SqlContendServiceFactory::new(repository, config.sql_config())?))
        }

        #[cfg(not(feature = "sqlite-backend"))]
        BackendType::Sqlite { .. } => Err(SimbaError::Config(
            "SQLite backend requires 'sqlite-backend' feature".to_string(),
        )),

        #[cfg(feature = "redis-backend")]
        BackendType::Redis { url } => {
            use simba_redis::RedisScriptedStore;
            let store = Arc::new(RedisScriptedStore::new(url).await?);
            Ok(Arc::new(KvContendServiceFactory::new(store, config.kv_config())?))
        }

        #[cfg(not(feature = "redis-backend"))]
        BackendType::Redis { .. } => Err(SimbaError::Config(
            "Redis backend requires 'redis-backend' feature".to_string(),
        )),

        BackendType::MemoryRedis => {
            let store = Arc::new(MemoryScriptedStore::new());
            Ok(Arc::new(KvContendServiceFactory::new(store, config.kv_config())?))
        }

        #[cfg(feature = "zookeeper-backend")]
        BackendType::Zookeeper { cluster } => {
            use simba_coordination::ZookeeperCoordinationClient;
            let client = ZookeeperCoordinationClient::connect(cluster).await?;
            Ok(Arc::new(CoordinationContendServiceFactory::new(Arc::new(client))))
        }

        #[cfg(not(feature = "zookeeper-backend"))]
        BackendType::Zookeeper { .. } => Err(SimbaError::Config(
            "ZooKeeper backend requires 'zookeeper-backend' feature".to_string(),
        )),

        BackendType::MemoryCoordination => {
            let client = MemoryCoordinationServer::new().connect().await;
            Ok(Arc::new(CoordinationContendServiceFactory::new(Arc::new(client))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = SimbaConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, SimbaConfig::default());
        assert_eq!(config.backend, BackendType::MemorySql);
        assert_eq!(config.ttl, Duration::from_secs(10));
        assert_eq!(config.transition, Duration::from_secs(6));
    }

    #[test]
    fn test_sqlite_with_timing() {
        let config = SimbaConfig::from_lookup(lookup_from(&[
            ("SIMBA_BACKEND", "SQLite"),
            ("SIMBA_SQLITE_URL", "sqlite://simba.db?mode=rwc"),
            ("SIMBA_TTL_MS", "2000"),
            ("SIMBA_TRANSITION_MS", "5000"),
            ("SIMBA_INITIAL_DELAY_MS", "100"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            BackendType::Sqlite {
                url: "sqlite://simba.db?mode=rwc".to_string()
            }
        );
        let sql = config.sql_config();
        assert_eq!(sql.ttl, Duration::from_millis(2000));
        assert_eq!(sql.transition, Duration::from_millis(5000));
        assert_eq!(sql.initial_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_redis_default_url() {
        let config = SimbaConfig::from_lookup(lookup_from(&[("SIMBA_BACKEND", "redis")])).unwrap();
        assert_eq!(
            config.backend,
            BackendType::Redis {
                url: DEFAULT_REDIS_URL.to_string()
            }
        );
        assert_eq!(config.backend.name(), "redis");
    }

    #[test]
    fn test_zookeeper_cluster() {
        let config = SimbaConfig::from_lookup(lookup_from(&[
            ("SIMBA_BACKEND", "zookeeper"),
            ("SIMBA_ZOOKEEPER_URL", "zk1:2181,zk2:2181/simba"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            BackendType::Zookeeper {
                cluster: "zk1:2181,zk2:2181/simba".to_string()
            }
        );
        assert_eq!(config.backend.name(), "zookeeper");
    }

    #[test]
    fn test_out_of_range_ttl_rejected() {
        let err = SimbaConfig::from_lookup(lookup_from(&[("SIMBA_TTL_MS", u64::MAX.to_string().as_str())])).unwrap_err();
        assert!(matches!(err, SimbaError::Config(_)));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = SimbaConfig::from_lookup(lookup_from(&[("SIMBA_BACKEND", "etcd")])).unwrap_err();
        assert!(matches!(err, SimbaError::Config(_)));
        assert!(err.to_string().contains("etcd"));
    }

    #[test]
    fn test_bad_millis_rejected() {
        let err = SimbaConfig::from_lookup(lookup_from(&[("SIMBA_TTL_MS", "ten")])).unwrap_err();
        assert!(err.to_string().contains("SIMBA_TTL_MS"));

        let err = SimbaConfig::from_lookup(lookup_from(&[("SIMBA_TTL_MS", "0")])).unwrap_err();
        assert!(matches!(err, SimbaError::Config(_)));
    }

    #[tokio::test]
    async fn test_memory_factories_build() {
        for backend in [
            BackendType::MemorySql,
            BackendType::MemoryRedis,
            BackendType::MemoryCoordination,
        ] {
            assert!(create_contend_service_factory(SimbaConfig::new(backend)).await.is_ok());
        }
    }

    #[cfg(not(feature = "redis-backend"))]
    #[tokio::test]
    async fn test_redis_without_feature_is_config_error() {
        let config = SimbaConfig::new(BackendType::Redis {
            url: DEFAULT_REDIS_URL.to_string(),
        });
        let err = create_contend_service_factory(config).await.err().unwrap();
        assert!(matches!(err, SimbaError::Config(_)));
    }

    #[cfg(not(feature = "zookeeper-backend"))]
    #[tokio::test]
    async fn test_zookeeper_without_feature_is_config_error() {
        let config = SimbaConfig::new(BackendType::Zookeeper {
            cluster: DEFAULT_ZOOKEEPER_URL.to_string(),
        });
        let err = create_contend_service_factory(config).await.err().unwrap();
        assert!(matches!(err, SimbaError::Config(_)));
    }
}
