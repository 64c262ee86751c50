// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use async_trait::async_trait;
use pc_tracking_core::EventHash;
use tokio::sync::Mutex;

use super::DedupStore;
use crate::error::Result;

/// Process-local store; entries vanish with the tracker.
#[derive(Debug, Default)]
pub struct MemoryStore {
	entries: Mutex<HashMap<EventHash, u64>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl DedupStore for MemoryStore {
	async fn get(&self, hash: &EventHash) -> Result<Option<u64>> {
		Ok(self.entries.lock().await.get(hash).copied())
	}

	async fn put(&self, hash: &EventHash, last_seen: u64) -> Result<()> {
		self.entries.lock().await.insert(hash.clone(), last_seen);
		Ok(())
	}

	async fn remove(&self, hash: &EventHash) -> Result<()> {
		self.entries.lock().await.remove(hash);
		Ok(())
	}

	async fn purge_older_than(&self, cutoff: u64) -> Result<usize> {
		let mut entries = self.entries.lock().await;
		let before = entries.len();
		entries.retain(|_, last_seen| *last_seen >= cutoff);
		Ok(before - entries.len())
	}

	async fn len(&self) -> Result<usize> {
		Ok(self.entries.lock().await.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_put_get_remove() {
		let store = MemoryStore::new();
		let hash = EventHash::from_raw("abc");

		assert_eq!(store.get(&hash).await.unwrap(), None);
		store.put(&hash, 10).await.unwrap();
		assert_eq!(store.get(&hash).await.unwrap(), Some(10));
		store.put(&hash, 20).await.unwrap();
		assert_eq!(store.get(&hash).await.unwrap(), Some(20));
		store.remove(&hash).await.unwrap();
		assert_eq!(store.len().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_purge_keeps_entries_at_cutoff() {
		let store = MemoryStore::new();
		store.put(&EventHash::from_raw("a"), 5).await.unwrap();
		store.put(&EventHash::from_raw("b"), 10).await.unwrap();
		store.put(&EventHash::from_raw("c"), 15).await.unwrap();

		assert_eq!(store.purge_older_than(10).await.unwrap(), 1);
		assert_eq!(store.len().await.unwrap(), 2);
	}
}
