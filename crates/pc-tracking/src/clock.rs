// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wall-clock source for dedup timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + 'static {
	fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now_ms(&self) -> u64 {
		u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
	}
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
	now: AtomicU64,
}

impl ManualClock {
	pub fn new(start_ms: u64) -> Self {
		Self {
			now: AtomicU64::new(start_ms),
		}
	}

	pub fn advance(&self, by: Duration) {
		let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
		self.now.fetch_add(by, Ordering::SeqCst);
	}

	pub fn set(&self, now_ms: u64) {
		self.now.store(now_ms, Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn now_ms(&self) -> u64 {
		self.now.load(Ordering::SeqCst)
	}
}
