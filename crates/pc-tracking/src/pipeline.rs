// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pipeline coordinator: dedup check, immediate or deferred delivery, retry
//! and cache update.
//!
//! Every entry point returns a uniform [`Result`]; nothing here calls back into
//! host code. Suppressed duplicates and opted-out calls are successful
//! outcomes, not errors.
//!
//! Dedup entries are marked before delivery starts (see [`DedupCache::check_and_record`])
//! and refreshed once the attempt has been made. With `cache.release_on_failure`
//! a terminal failure drops the entry again so the event can be resubmitted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pc_tracking_core::{
	validate_collection_name, validate_payload_size, CacheConfig, DeliveryMode, Event,
	TrackingConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::dedup::{DedupCache, DedupStore, MemoryStore};
use crate::delivery::RetryController;
use crate::error::{Result, TrackingError};
use crate::queue::{DeferredQueue, FlushBatch, FlushHandler, FlushTrigger};
use crate::transport::{DeliveryResponse, Dispatch, Transport};

/// Successful result of a record or defer call.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
	/// The transport accepted the delivery (or, fire-and-forget, sent it).
	Delivered(DeliveryResponse),
	/// A live dedup entry exists; the transport was not contacted.
	Suppressed,
	/// Buffered in the deferred queue.
	Queued,
	/// Tracking is disabled by opt-out or Do-Not-Track.
	OptedOut,
}

impl RecordOutcome {
	pub fn is_delivered(&self) -> bool {
		matches!(self, RecordOutcome::Delivered(_))
	}
}

pub struct Pipeline {
	dedup: Option<DedupCache>,
	cache_config: CacheConfig,
	queue: Arc<DeferredQueue>,
	retry: RetryController,
	mode: DeliveryMode,
	clock: Arc<dyn Clock>,
	opted_out: AtomicBool,
	cancel: CancellationToken,
	torn_down: AtomicBool,
}

impl Pipeline {
	/// Builds a pipeline with an in-memory dedup store (when `unique` is set).
	///
	/// `mode` is the already resolved delivery mode; see
	/// [`pc_tracking_core::resolve_delivery_mode`].
	pub fn new(config: &TrackingConfig, mode: DeliveryMode, transport: Arc<dyn Transport>) -> Result<Self> {
		config.validate()?;

		let cancel = CancellationToken::new();
		let dedup = config
			.unique
			.then(|| DedupCache::new(Arc::new(MemoryStore::new()), &config.cache));

		Ok(Self {
			dedup,
			cache_config: config.cache.clone(),
			queue: Arc::new(DeferredQueue::new(config.queue)?),
			retry: RetryController::new(transport, &config.retry, cancel.clone()),
			mode,
			clock: Arc::new(SystemClock),
			opted_out: AtomicBool::new(config.tracking_disabled()),
			cancel,
			torn_down: AtomicBool::new(false),
		})
	}

	/// Replaces the dedup backend. Ignored when `unique` is off.
	pub fn with_store(mut self, store: Arc<dyn DedupStore>) -> Self {
		if self.dedup.is_some() {
			self.dedup = Some(DedupCache::new(store, &self.cache_config));
		}
		self
	}

	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	pub fn mode(&self) -> DeliveryMode {
		self.mode
	}

	pub fn queue(&self) -> Arc<DeferredQueue> {
		Arc::clone(&self.queue)
	}

	pub fn dedup(&self) -> Option<&DedupCache> {
		self.dedup.as_ref()
	}

	/// Token cancelled by [`Pipeline::teardown`]; stops retries and the queue worker.
	pub fn cancel_token(&self) -> CancellationToken {
		self.cancel.clone()
	}

	pub fn set_opt_out(&self, opted_out: bool) {
		self.opted_out.store(opted_out, Ordering::SeqCst);
	}

	pub fn is_opted_out(&self) -> bool {
		self.opted_out.load(Ordering::SeqCst)
	}

	pub fn is_torn_down(&self) -> bool {
		self.torn_down.load(Ordering::SeqCst)
	}

	/// Delivers one event now, unless it is a live duplicate.
	pub async fn record_event(&self, event: Event) -> Result<RecordOutcome> {
		if let Some(outcome) = self.gate(&event)? {
			return Ok(outcome);
		}
		if self.mark(&event).await? {
			return Ok(RecordOutcome::Suppressed);
		}

		let events = [event];
		self.deliver(&events, Dispatch::Single, self.mode)
			.await
			.map(RecordOutcome::Delivered)
	}

	/// Delivers the non-duplicate events as one batch.
	///
	/// An empty list is rejected; `Suppressed` always means at least one
	/// duplicate was dropped.
	pub async fn record_events(&self, events: Vec<Event>) -> Result<RecordOutcome> {
		self.check_open()?;
		if self.is_opted_out() {
			return Ok(RecordOutcome::OptedOut);
		}
		if events.is_empty() {
			return Err(TrackingError::ValidationFailed("no events to record".to_string()));
		}
		for event in &events {
			validate_event(event)?;
		}

		let mut fresh = Vec::with_capacity(events.len());
		for event in events {
			if !self.mark(&event).await? {
				fresh.push(event);
			}
		}
		if fresh.is_empty() {
			return Ok(RecordOutcome::Suppressed);
		}

		self.deliver(&fresh, Dispatch::Batch, self.mode)
			.await
			.map(RecordOutcome::Delivered)
	}

	/// Buffers the event for the next flush, unless it is a live duplicate.
	pub async fn defer_event(&self, event: Event) -> Result<RecordOutcome> {
		if let Some(outcome) = self.gate(&event)? {
			return Ok(outcome);
		}
		if self.mark(&event).await? {
			return Ok(RecordOutcome::Suppressed);
		}

		let hashed = self.dedup.as_ref().map(|_| event.clone());
		if let Err(e) = self.queue.enqueue(event).await {
			if let (Some(dedup), Some(event)) = (&self.dedup, hashed) {
				dedup.forget(&event).await?;
			}
			return Err(e);
		}
		Ok(RecordOutcome::Queued)
	}

	pub async fn defer_events(&self, events: Vec<Event>) -> Result<Vec<RecordOutcome>> {
		for event in &events {
			validate_event(event)?;
		}
		let mut outcomes = Vec::with_capacity(events.len());
		for event in events {
			outcomes.push(self.defer_event(event).await?);
		}
		Ok(outcomes)
	}

	/// Delivers a detached queue batch as one unit.
	///
	/// Exit batches always go out fire-and-forget.
	pub async fn record_deferred_events(&self, batch: FlushBatch) -> Result<DeliveryResponse> {
		if batch.is_empty() {
			return Ok(DeliveryResponse::unobserved());
		}

		let mode = match batch.trigger {
			FlushTrigger::Exit => DeliveryMode::FireAndForget,
			_ => self.mode,
		};
		debug!(
			trigger = batch.trigger.as_str(),
			count = batch.len(),
			mode = %mode,
			"delivering deferred batch"
		);

		let events = batch.into_events();
		self.deliver(&events, Dispatch::Batch, mode).await
	}

	/// Flushes the deferred queue now; `None` when nothing was buffered.
	///
	/// The queue reports [`QueueState::Flushing`](crate::QueueState::Flushing)
	/// until the delivery has finished.
	pub async fn flush(&self) -> Result<Option<DeliveryResponse>> {
		self.check_open()?;
		let _flushing = self.queue.begin_flush();
		match self.queue.flush().await {
			Some(batch) => self.record_deferred_events(batch).await.map(Some),
			None => Ok(None),
		}
	}

	/// Sends one event immediately in fire-and-forget mode.
	pub async fn record_exit_event(&self, event: Event) -> Result<RecordOutcome> {
		if let Some(outcome) = self.gate(&event)? {
			return Ok(outcome);
		}
		if self.mark(&event).await? {
			return Ok(RecordOutcome::Suppressed);
		}

		let events = [event];
		self.deliver(&events, Dispatch::Single, DeliveryMode::FireAndForget)
			.await
			.map(RecordOutcome::Delivered)
	}

	/// Stops the pipeline: closes the queue, cancels pending retries and the
	/// queue timer, and sends whatever was still buffered fire-and-forget.
	///
	/// Returns the number of events in the exit flush. Idempotent.
	pub async fn teardown(&self) -> Result<usize> {
		if self.torn_down.swap(true, Ordering::SeqCst) {
			return Ok(0);
		}

		info!("tearing down tracking pipeline");
		let pending = self.queue.close().await;
		self.cancel.cancel();

		let mut sent = 0;
		for batch in pending {
			let count = batch.len();
			match self.record_deferred_events(batch).await {
				Ok(_) => sent += count,
				Err(e) => warn!(error = %e, count = count, "exit flush failed"),
			}
		}

		info!(count = sent, "tracking pipeline torn down");
		Ok(sent)
	}

	fn check_open(&self) -> Result<()> {
		if self.is_torn_down() {
			return Err(TrackingError::ClientShutdown);
		}
		Ok(())
	}

	/// Common admission checks; `Some` short-circuits the call.
	fn gate(&self, event: &Event) -> Result<Option<RecordOutcome>> {
		self.check_open()?;
		if self.is_opted_out() {
			debug!(collection = %event.collection, "tracking disabled, dropping event");
			return Ok(Some(RecordOutcome::OptedOut));
		}
		validate_event(event)?;
		Ok(None)
	}

	/// Atomic dedup check-and-mark. Returns true for a live duplicate.
	async fn mark(&self, event: &Event) -> Result<bool> {
		match &self.dedup {
			Some(dedup) => dedup.check_and_record(event, self.clock.now_ms()).await,
			None => Ok(false),
		}
	}

	async fn deliver(
		&self,
		events: &[Event],
		dispatch: Dispatch,
		mode: DeliveryMode,
	) -> Result<DeliveryResponse> {
		let result = self.retry.send(events, dispatch, mode).await;

		if let Some(dedup) = &self.dedup {
			let release = result.is_err() && self.cache_config.release_on_failure;
			let now = self.clock.now_ms();
			for event in events {
				let updated = if release {
					dedup.forget(event).await
				} else {
					dedup.record(event, now).await
				};
				if let Err(e) = updated {
					warn!(error = %e, collection = %event.collection, "failed to update dedup cache");
				}
			}
		}

		result
	}
}

fn validate_event(event: &Event) -> Result<()> {
	if !validate_collection_name(&event.collection) {
		return Err(TrackingError::ValidationFailed(format!(
			"invalid collection name: {}",
			event.collection
		)));
	}
	if !validate_payload_size(&event.payload) {
		return Err(TrackingError::ValidationFailed(
			"payload exceeds maximum size (1MB)".to_string(),
		));
	}
	Ok(())
}

#[async_trait]
impl FlushHandler for Pipeline {
	async fn on_flush(&self, batch: FlushBatch) -> Result<()> {
		self.record_deferred_events(batch).await.map(|_| ())
	}
}
