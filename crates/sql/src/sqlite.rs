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

//! SQLite mutex owner repository.
//!
//! Schema (times in ms since epoch, from the database clock):
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS simba_mutex (
//!   mutex TEXT PRIMARY KEY,
//!   acquired_at INTEGER NOT NULL DEFAULT 0,
//!   ttl_at INTEGER NOT NULL DEFAULT 0,
//!   transition_at INTEGER NOT NULL DEFAULT 0,
//!   owner_id TEXT NOT NULL DEFAULT '',
//!   version INTEGER NOT NULL DEFAULT 0
//! );
//! ```
//!
//! Every statement reads the server clock itself, so contenders on different
//! hosts compare against a single time source.

use crate::repository::{inconsistent, AcquireOutcome, MutexOwnerEntity, MutexOwnerRepository};
use async_trait::async_trait;
use simba_core::{MutexOwner, SimbaError, SimbaResult};
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

/// Current database time in epoch milliseconds.
const DB_NOW: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS simba_mutex (
      mutex TEXT PRIMARY KEY,
      acquired_at INTEGER NOT NULL DEFAULT 0,
      ttl_at INTEGER NOT NULL DEFAULT 0,
      transition_at INTEGER NOT NULL DEFAULT 0,
      owner_id TEXT NOT NULL DEFAULT '',
      version INTEGER NOT NULL DEFAULT 0
    );
"#;

fn backend(context: &str) -> impl FnOnce(sqlx::Error) -> SimbaError + '_ {
    move |e| SimbaError::Backend(format!("{context}: {e}"))
}

fn acquire_sql() -> String {
    format!(
        "UPDATE simba_mutex \
         SET acquired_at = {now}, ttl_at = {now} + ?1, transition_at = {now} + ?1 + ?2, \
             owner_id = ?3, version = version + 1 \
         WHERE mutex = ?4 AND (transition_at < {now} OR (owner_id = ?3 AND transition_at > {now}))",
        now = DB_NOW
    )
}

fn get_owner_sql() -> String {
    format!(
        "SELECT mutex, acquired_at, ttl_at, transition_at, owner_id, version, {DB_NOW} AS current_db_at \
         FROM simba_mutex WHERE mutex = ?1"
    )
}

const RELEASE_SQL: &str = "UPDATE simba_mutex \
     SET acquired_at = 0, ttl_at = 0, transition_at = 0, owner_id = '', version = version + 1 \
     WHERE mutex = ?1 AND owner_id = ?2";

const INIT_SQL: &str = "INSERT INTO simba_mutex (mutex, acquired_at, ttl_at, transition_at, owner_id, version) \
     VALUES (?1, 0, 0, 0, '', 0)";

const TRY_INIT_SQL: &str = "INSERT INTO simba_mutex (mutex, acquired_at, ttl_at, transition_at, owner_id, version) \
     VALUES (?1, 0, 0, 0, '', 0) ON CONFLICT(mutex) DO NOTHING";

fn entity_from_row(row: &SqliteRow) -> MutexOwnerEntity {
    let owner = MutexOwner::new(
        row.get::<String, _>("owner_id"),
        row.get::<i64, _>("acquired_at"),
        row.get::<i64, _>("ttl_at"),
        row.get::<i64, _>("transition_at"),
    );
    MutexOwnerEntity::new(
        row.get::<String, _>("mutex"),
        owner,
        row.get::<i64, _>("version"),
        row.get::<i64, _>("current_db_at"),
    )
}

/// SQLite-backed repository.
#[derive(Clone)]
pub struct SqliteMutexOwnerRepository {
    pool: SqlitePool,
}

impl SqliteMutexOwnerRepository {
    /// Connect and create the table if needed.
    ///
    /// `database_url` is any `sqlx` SQLite URL, e.g. `sqlite::memory:` or
    /// `sqlite://simba.db?mode=rwc`. In-memory databases are private to one
    /// connection, so they get a single-connection pool.
    #[instrument(skip(database_url))]
    pub async fn new(database_url: &str) -> SimbaResult<Self> {
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };
        let pool = options
            .connect(database_url)
            .await
            .map_err(backend("failed to connect SQLite"))?;
        Self::from_pool(pool).await
    }

    /// Use an existing pool; creates the table if needed.
    pub async fn from_pool(pool: SqlitePool) -> SimbaResult<Self> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(backend("failed to create simba_mutex table"))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn acquire_on(
        conn: &mut SqliteConnection,
        mutex: &str,
        contender_id: &str,
        ttl_ms: i64,
        transition_ms: i64,
    ) -> SimbaResult<bool> {
        let result = sqlx::query(&acquire_sql())
            .bind(ttl_ms)
            .bind(transition_ms)
            .bind(contender_id)
            .bind(mutex)
            .execute(&mut *conn)
            .await
            .map_err(backend("acquire"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_owner_on(conn: &mut SqliteConnection, mutex: &str) -> SimbaResult<MutexOwnerEntity> {
        let row = sqlx::query(&get_owner_sql())
            .bind(mutex)
            .fetch_optional(&mut *conn)
            .await
            .map_err(backend("get owner"))?;
        row.as_ref()
            .map(entity_from_row)
            .ok_or_else(|| SimbaError::NotFoundMutexOwner(mutex.to_string()))
    }

    async fn ensure_owner_on(conn: &mut SqliteConnection, mutex: &str) -> SimbaResult<MutexOwnerEntity> {
        match Self::get_owner_on(conn, mutex).await {
            Err(SimbaError::NotFoundMutexOwner(_)) => {
                sqlx::query(TRY_INIT_SQL)
                    .bind(mutex)
                    .execute(&mut *conn)
                    .await
                    .map_err(backend("init mutex"))?;
                Self::get_owner_on(conn, mutex).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl MutexOwnerRepository for SqliteMutexOwnerRepository {
    #[instrument(skip(self))]
    async fn init_mutex(&self, mutex: &str) -> SimbaResult<()> {
        sqlx::query(INIT_SQL).bind(mutex).execute(&self.pool).await.map_err(|e| {
            let duplicate = e
                .as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false);
            if duplicate {
                SimbaError::Backend(format!("duplicate key: mutex [{mutex}] already initialized"))
            } else {
                SimbaError::Backend(format!("init mutex: {e}"))
            }
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_owner(&self, mutex: &str) -> SimbaResult<MutexOwnerEntity> {
        let mut conn = self.pool.acquire().await.map_err(backend("acquire conn"))?;
        Self::get_owner_on(&mut *conn, mutex).await
    }

    #[instrument(skip(self))]
    async fn acquire(&self, mutex: &str, contender_id: &str, ttl_ms: i64, transition_ms: i64) -> SimbaResult<bool> {
        let mut conn = self.pool.acquire().await.map_err(backend("acquire conn"))?;
        Self::acquire_on(&mut *conn, mutex, contender_id, ttl_ms, transition_ms).await
    }

    #[instrument(skip(self))]
    async fn release(&self, mutex: &str, contender_id: &str) -> SimbaResult<bool> {
        let result = sqlx::query(RELEASE_SQL)
            .bind(mutex)
            .bind(contender_id)
            .execute(&self.pool)
            .await
            .map_err(backend("release"))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn acquire_and_get_owner(
        &self,
        mutex: &str,
        contender_id: &str,
        ttl_ms: i64,
        transition_ms: i64,
    ) -> SimbaResult<MutexOwnerEntity> {
        let mut tx = self.pool.begin().await.map_err(backend("begin tx"))?;
        let mut retried = false;
        loop {
            let acquired = Self::acquire_on(&mut *tx, mutex, contender_id, ttl_ms, transition_ms).await?;
            let entity = Self::ensure_owner_on(&mut *tx, mutex).await?;
            match AcquireOutcome::of(acquired, &entity, contender_id, retried) {
                AcquireOutcome::Settled => {
                    tx.commit().await.map_err(backend("commit tx"))?;
                    return Ok(entity);
                }
                AcquireOutcome::Retry => {
                    debug!(mutex, contender_id, "mutex row was just created, retrying acquire");
                    retried = true;
                }
                AcquireOutcome::Inconsistent => {
                    tx.rollback().await.map_err(backend("rollback tx"))?;
                    return Err(inconsistent(mutex, contender_id));
                }
            }
        }
    }
}
