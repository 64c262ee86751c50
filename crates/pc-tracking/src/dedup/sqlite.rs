// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable dedup entries in a SQLite file.
//!
//! Layout follows the cache settings: the file is `<db_dir>/<db_name>.sqlite3`,
//! the table is `db_collection_name` and the key column `db_collection_key`.
//! Each row stores the hash and its `last_seen` timestamp in milliseconds.

use async_trait::async_trait;
use pc_tracking_core::{validate_identifier, CacheConfig, CacheStorage, EventHash};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};

use super::DedupStore;
use crate::error::{Result, TrackingError};

pub struct SqliteStore {
	pool: SqlitePool,
	select_sql: String,
	upsert_sql: String,
	delete_sql: String,
	purge_sql: String,
	count_sql: String,
}

impl SqliteStore {
	/// Opens (creating if needed) the database described by `config`.
	#[tracing::instrument(skip(config), fields(db_name = %config.db_name))]
	pub async fn open(config: &CacheConfig) -> Result<Self> {
		let config = CacheConfig {
			storage: CacheStorage::Sqlite,
			..config.clone()
		};
		config.validate()?;

		let path = config.db_path();
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)
				.map_err(|e| TrackingError::Store(format!("cannot create {}: {e}", parent.display())))?;
		}

		let options = SqliteConnectOptions::new()
			.filename(&path)
			.journal_mode(SqliteJournalMode::Wal)
			.synchronous(SqliteSynchronous::Normal)
			.create_if_missing(true);

		let pool = SqlitePool::connect_with(options).await?;
		tracing::debug!(path = %path.display(), "dedup database opened");

		Self::from_pool(pool, &config.db_collection_name, &config.db_collection_key).await
	}

	/// Uses an existing pool; `table` and `key_column` must be plain identifiers.
	pub async fn from_pool(pool: SqlitePool, table: &str, key_column: &str) -> Result<Self> {
		validate_identifier("cache.db_collection_name", table)?;
		validate_identifier("cache.db_collection_key", key_column)?;

		sqlx::query(&format!(
			"CREATE TABLE IF NOT EXISTS {table} (
				{key_column} TEXT PRIMARY KEY,
				last_seen INTEGER NOT NULL
			)"
		))
		.execute(&pool)
		.await?;

		sqlx::query(&format!(
			"CREATE INDEX IF NOT EXISTS idx_{table}_last_seen ON {table} (last_seen)"
		))
		.execute(&pool)
		.await?;

		Ok(Self {
			pool,
			select_sql: format!("SELECT last_seen FROM {table} WHERE {key_column} = ?"),
			upsert_sql: format!(
				"INSERT INTO {table} ({key_column}, last_seen) VALUES (?, ?)
				ON CONFLICT({key_column}) DO UPDATE SET last_seen = excluded.last_seen"
			),
			delete_sql: format!("DELETE FROM {table} WHERE {key_column} = ?"),
			purge_sql: format!("DELETE FROM {table} WHERE last_seen < ?"),
			count_sql: format!("SELECT COUNT(*) FROM {table}"),
		})
	}

	pub async fn close(&self) {
		self.pool.close().await;
	}
}

fn to_db(ms: u64) -> i64 {
	i64::try_from(ms).unwrap_or(i64::MAX)
}

#[async_trait]
impl DedupStore for SqliteStore {
	async fn get(&self, hash: &EventHash) -> Result<Option<u64>> {
		let row: Option<i64> = sqlx::query_scalar(&self.select_sql)
			.bind(hash.as_str())
			.fetch_optional(&self.pool)
			.await?;
		Ok(row.map(|ms| u64::try_from(ms).unwrap_or(0)))
	}

	async fn put(&self, hash: &EventHash, last_seen: u64) -> Result<()> {
		sqlx::query(&self.upsert_sql)
			.bind(hash.as_str())
			.bind(to_db(last_seen))
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn remove(&self, hash: &EventHash) -> Result<()> {
		sqlx::query(&self.delete_sql)
			.bind(hash.as_str())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn purge_older_than(&self, cutoff: u64) -> Result<usize> {
		let result = sqlx::query(&self.purge_sql)
			.bind(to_db(cutoff))
			.execute(&self.pool)
			.await?;
		Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
	}

	async fn len(&self) -> Result<usize> {
		let count: i64 = sqlx::query_scalar(&self.count_sql)
			.fetch_one(&self.pool)
			.await?;
		Ok(usize::try_from(count).unwrap_or(0))
	}
}
