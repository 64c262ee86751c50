// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! TTL-bounded duplicate suppression.
//!
//! [`DedupCache`] maps an [`EventHash`] to the time it was last seen. An entry
//! is live while `now - last_seen <= max_age`; anything older is treated as
//! absent on lookup even if the store still holds it. Expired rows are swept
//! from the store at most once per `max_age` while recording.
//!
//! Check and mark go through one async mutex, so two concurrent submissions
//! of the same event cannot both pass [`DedupCache::check_and_record`].

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pc_tracking_core::{CacheConfig, Event, EventHash, HashingMethod};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;

/// Backend holding `hash -> last_seen` entries (milliseconds since epoch).
#[async_trait]
pub trait DedupStore: Send + Sync {
	async fn get(&self, hash: &EventHash) -> Result<Option<u64>>;

	/// Inserts the entry or refreshes its timestamp.
	async fn put(&self, hash: &EventHash, last_seen: u64) -> Result<()>;

	async fn remove(&self, hash: &EventHash) -> Result<()>;

	/// Removes entries with `last_seen < cutoff`, returning how many went.
	async fn purge_older_than(&self, cutoff: u64) -> Result<usize>;

	async fn len(&self) -> Result<usize>;
}

pub struct DedupCache {
	store: Arc<dyn DedupStore>,
	hashing_method: Option<HashingMethod>,
	max_age_ms: u64,
	last_sweep: Mutex<u64>,
}

impl DedupCache {
	pub fn new(store: Arc<dyn DedupStore>, config: &CacheConfig) -> Self {
		Self {
			store,
			hashing_method: config.hashing_method,
			max_age_ms: config.max_age_ms,
			last_sweep: Mutex::new(0),
		}
	}

	pub fn max_age(&self) -> Duration {
		Duration::from_millis(self.max_age_ms)
	}

	pub fn hash(&self, event: &Event) -> EventHash {
		EventHash::compute(event, self.hashing_method)
	}

	fn is_live(&self, last_seen: u64, now: u64) -> bool {
		now.saturating_sub(last_seen) <= self.max_age_ms
	}

	/// Returns true iff a live entry exists for the event. Never writes.
	pub async fn should_suppress(&self, event: &Event, now: u64) -> Result<bool> {
		let hash = self.hash(event);
		let _gate = self.last_sweep.lock().await;
		self.lookup(&hash, now).await
	}

	/// Inserts or refreshes the event's entry at `now`.
	pub async fn record(&self, event: &Event, now: u64) -> Result<()> {
		let hash = self.hash(event);
		let mut last_sweep = self.last_sweep.lock().await;
		self.store.put(&hash, now).await?;
		self.maybe_sweep(&mut last_sweep, now).await
	}

	/// Suppression check and optimistic mark as one step.
	///
	/// Returns `true` when the event is a live duplicate (nothing is written).
	/// Otherwise the entry is recorded at `now` and `false` is returned.
	pub async fn check_and_record(&self, event: &Event, now: u64) -> Result<bool> {
		let hash = self.hash(event);
		let mut last_sweep = self.last_sweep.lock().await;

		if self.lookup(&hash, now).await? {
			debug!(collection = %event.collection, "suppressing duplicate event");
			return Ok(true);
		}

		self.store.put(&hash, now).await?;
		self.maybe_sweep(&mut last_sweep, now).await?;
		Ok(false)
	}

	/// Drops the event's entry so a resubmission is not suppressed.
	pub async fn forget(&self, event: &Event) -> Result<()> {
		let hash = self.hash(event);
		let _gate = self.last_sweep.lock().await;
		self.store.remove(&hash).await
	}

	/// Removes every entry older than `max_age` at `now`.
	pub async fn purge_expired(&self, now: u64) -> Result<usize> {
		let mut last_sweep = self.last_sweep.lock().await;
		let removed = self
			.store
			.purge_older_than(now.saturating_sub(self.max_age_ms))
			.await?;
		*last_sweep = now;
		if removed > 0 {
			debug!(removed = removed, "purged expired dedup entries");
		}
		Ok(removed)
	}

	/// Physical entry count, including expired rows not yet swept.
	pub async fn len(&self) -> Result<usize> {
		self.store.len().await
	}

	async fn lookup(&self, hash: &EventHash, now: u64) -> Result<bool> {
		Ok(match self.store.get(hash).await? {
			Some(last_seen) => self.is_live(last_seen, now),
			None => false,
		})
	}

	async fn maybe_sweep(&self, last_sweep: &mut u64, now: u64) -> Result<()> {
		if now.saturating_sub(*last_sweep) < self.max_age_ms {
			return Ok(());
		}
		let removed = self
			.store
			.purge_older_than(now.saturating_sub(self.max_age_ms))
			.await?;
		*last_sweep = now;
		if removed > 0 {
			debug!(removed = removed, "swept expired dedup entries");
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn cache(max_age_ms: u64, hashing_method: Option<HashingMethod>) -> DedupCache {
		let config = CacheConfig {
			max_age_ms,
			hashing_method,
			..CacheConfig::default()
		};
		DedupCache::new(Arc::new(MemoryStore::new()), &config)
	}

	#[tokio::test]
	async fn test_unknown_event_is_not_suppressed() {
		let cache = cache(60_000, None);
		let event = Event::new("clicks", json!({"id": 1}));
		assert!(!cache.should_suppress(&event, 1_000).await.unwrap());
	}

	#[tokio::test]
	async fn test_should_suppress_is_a_pure_read() {
		let cache = cache(60_000, None);
		let event = Event::new("clicks", json!({"id": 1}));
		cache.should_suppress(&event, 1_000).await.unwrap();
		assert_eq!(cache.len().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_recorded_event_is_suppressed_within_ttl() {
		let cache = cache(60_000, Some(HashingMethod::Sha256));
		let event = Event::new("clicks", json!({"id": 1}));
		cache.record(&event, 1_000).await.unwrap();

		assert!(cache.should_suppress(&event, 1_000).await.unwrap());
		assert!(cache.should_suppress(&event, 61_000).await.unwrap());
	}

	#[tokio::test]
	async fn test_expired_entry_is_never_live() {
		let cache = cache(60_000, None);
		let event = Event::new("clicks", json!({"id": 1}));
		cache.record(&event, 1_000).await.unwrap();

		assert!(!cache.should_suppress(&event, 61_001).await.unwrap());
		assert_eq!(cache.len().await.unwrap(), 1, "expired row not yet swept");
	}

	#[tokio::test]
	async fn test_structurally_identical_payloads_share_an_entry() {
		let cache = cache(60_000, Some(HashingMethod::Md5));
		let a = Event::new("clicks", json!({"a": 1, "b": 2, "local_time_full": "t1"}));
		let b = Event::new("clicks", json!({"b": 2, "a": 1, "local_time_full": "t2"}));

		assert!(!cache.check_and_record(&a, 0).await.unwrap());
		assert!(cache.check_and_record(&b, 10).await.unwrap());
	}

	#[tokio::test]
	async fn test_check_and_record_marks_once() {
		let cache = cache(60_000, None);
		let event = Event::new("clicks", json!({"id": 1}));

		assert!(!cache.check_and_record(&event, 0).await.unwrap());
		assert!(cache.check_and_record(&event, 1).await.unwrap());
		assert!(!cache.check_and_record(&event, 60_002).await.unwrap());
	}

	#[tokio::test]
	async fn test_concurrent_checks_admit_exactly_one() {
		let cache = Arc::new(cache(60_000, None));
		let event = Event::new("clicks", json!({"id": 7}));

		let mut handles = Vec::new();
		for _ in 0..16 {
			let cache = Arc::clone(&cache);
			let event = event.clone();
			handles.push(tokio::spawn(async move {
				cache.check_and_record(&event, 5).await.unwrap()
			}));
		}

		let mut admitted = 0;
		for handle in handles {
			if !handle.await.unwrap() {
				admitted += 1;
			}
		}
		assert_eq!(admitted, 1);
	}

	#[tokio::test]
	async fn test_record_refreshes_last_seen() {
		let cache = cache(1_000, None);
		let event = Event::new("clicks", json!({}));
		cache.record(&event, 0).await.unwrap();
		cache.record(&event, 900).await.unwrap();

		assert!(cache.should_suppress(&event, 1_800).await.unwrap());
	}

	#[tokio::test]
	async fn test_forget_releases_entry() {
		let cache = cache(60_000, None);
		let event = Event::new("clicks", json!({"id": 1}));
		cache.record(&event, 0).await.unwrap();
		cache.forget(&event).await.unwrap();
		assert!(!cache.should_suppress(&event, 1).await.unwrap());
	}

	#[tokio::test]
	async fn test_purge_expired_removes_only_dead_entries() {
		let cache = cache(1_000, None);
		let old = Event::new("clicks", json!({"id": "old"}));
		let fresh = Event::new("clicks", json!({"id": "fresh"}));
		cache.record(&old, 0).await.unwrap();
		cache.record(&fresh, 900).await.unwrap();

		let removed = cache.purge_expired(1_500).await.unwrap();
		assert_eq!(removed, 1);
		assert_eq!(cache.len().await.unwrap(), 1);
		assert!(cache.should_suppress(&fresh, 1_500).await.unwrap());
	}

	#[tokio::test]
	async fn test_recording_sweeps_once_per_max_age() {
		let cache = cache(1_000, None);
		for i in 0..5 {
			cache
				.record(&Event::new("clicks", json!({ "i": i })), 0)
				.await
				.unwrap();
		}
		assert_eq!(cache.len().await.unwrap(), 5);

		cache
			.record(&Event::new("clicks", json!({"i": "late"})), 5_000)
			.await
			.unwrap();
		assert_eq!(cache.len().await.unwrap(), 1);
	}
}
