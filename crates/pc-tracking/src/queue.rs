// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deferred event queue with capacity and interval flush triggers.
//!
//! Entries accumulate in a buffer guarded by an async mutex. Every flush
//! detaches the whole buffer with `mem::take` while the lock is held, so an
//! entry enqueued concurrently lands either in the detached batch or in the
//! next one, never in both and never in neither.
//!
//! The interval timer is armed by the first enqueue into an empty buffer and
//! disarmed by any flush. Capacity flushes are detached inside `enqueue` and
//! handed to the worker ([`DeferredQueue::run`]) over a channel; the worker
//! also owns the timer and calls the [`FlushHandler`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pc_tracking_core::{validate_capacity, validate_interval_ms, ConfigError, Event, QueueConfig};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TrackingError};

/// A buffered event and the time it was deferred.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
	pub event: Event,
	pub enqueued_at: DateTime<Utc>,
}

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
	Capacity,
	Interval,
	Manual,
	/// Teardown; delivered fire-and-forget.
	Exit,
}

impl FlushTrigger {
	pub fn as_str(&self) -> &'static str {
		match self {
			FlushTrigger::Capacity => "capacity",
			FlushTrigger::Interval => "interval",
			FlushTrigger::Manual => "manual",
			FlushTrigger::Exit => "exit",
		}
	}
}

/// Entries detached by one flush, in enqueue order.
#[derive(Debug, Clone)]
pub struct FlushBatch {
	pub trigger: FlushTrigger,
	pub entries: Vec<QueuedEvent>,
}

impl FlushBatch {
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn events(&self) -> impl Iterator<Item = &Event> {
		self.entries.iter().map(|e| &e.event)
	}

	pub fn into_events(self) -> Vec<Event> {
		self.entries.into_iter().map(|e| e.event).collect()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
	/// Empty buffer, timer inactive.
	Idle,
	/// Entries buffered, timer armed.
	Accumulating,
	/// A batch is being delivered, by the worker or a manual flush.
	Flushing,
}

/// Holds the queue in [`QueueState::Flushing`] until dropped.
pub struct FlushGuard<'a> {
	flushing: &'a AtomicUsize,
}

impl Drop for FlushGuard<'_> {
	fn drop(&mut self) {
		self.flushing.fetch_sub(1, Ordering::SeqCst);
	}
}

/// Consumer of detached batches.
#[async_trait]
pub trait FlushHandler: Send + Sync {
	async fn on_flush(&self, batch: FlushBatch) -> Result<()>;
}

struct Buffer {
	entries: Vec<QueuedEvent>,
	deadline: Option<Instant>,
	capacity: usize,
	interval: Duration,
}

impl Buffer {
	fn detach(&mut self, trigger: FlushTrigger) -> Option<FlushBatch> {
		self.deadline = None;
		if self.entries.is_empty() {
			return None;
		}
		Some(FlushBatch {
			trigger,
			entries: std::mem::take(&mut self.entries),
		})
	}
}

pub struct DeferredQueue {
	buffer: Mutex<Buffer>,
	ready_tx: mpsc::UnboundedSender<FlushBatch>,
	ready_rx: Mutex<Option<mpsc::UnboundedReceiver<FlushBatch>>>,
	timer_changed: Notify,
	flushing: AtomicUsize,
	closed: AtomicBool,
}

impl DeferredQueue {
	/// Creates a queue; fails on a zero capacity or interval.
	pub fn new(config: QueueConfig) -> Result<Self> {
		config.validate()?;
		let (ready_tx, ready_rx) = mpsc::unbounded_channel();
		Ok(Self {
			buffer: Mutex::new(Buffer {
				entries: Vec::new(),
				deadline: None,
				capacity: config.capacity,
				interval: config.interval(),
			}),
			ready_tx,
			ready_rx: Mutex::new(Some(ready_rx)),
			timer_changed: Notify::new(),
			flushing: AtomicUsize::new(0),
			closed: AtomicBool::new(false),
		})
	}

	pub async fn enqueue(&self, event: Event) -> Result<()> {
		let mut buffer = self.buffer.lock().await;
		// Checked under the lock so nothing lands after close() detached the buffer.
		if self.closed.load(Ordering::SeqCst) {
			return Err(TrackingError::ClientShutdown);
		}

		buffer.entries.push(QueuedEvent {
			event,
			enqueued_at: Utc::now(),
		});

		if buffer.entries.len() >= buffer.capacity {
			if let Some(batch) = buffer.detach(FlushTrigger::Capacity) {
				debug!(count = batch.len(), "capacity reached, detaching batch");
				self.dispatch(batch);
			}
			drop(buffer);
			self.timer_changed.notify_one();
		} else if buffer.deadline.is_none() {
			// Left unarmed if the interval does not fit on the clock.
			buffer.deadline = Instant::now().checked_add(buffer.interval);
			drop(buffer);
			self.timer_changed.notify_one();
		}

		Ok(())
	}

	/// Detaches whatever is buffered as a manual batch.
	///
	/// The caller delivers the batch; `None` when the buffer was empty.
	pub async fn flush(&self) -> Option<FlushBatch> {
		let batch = self.buffer.lock().await.detach(FlushTrigger::Manual);
		self.timer_changed.notify_one();
		batch
	}

	/// Marks a flush in progress for callers delivering a batch themselves.
	pub fn begin_flush(&self) -> FlushGuard<'_> {
		self.flushing.fetch_add(1, Ordering::SeqCst);
		FlushGuard {
			flushing: &self.flushing,
		}
	}

	pub async fn len(&self) -> usize {
		self.buffer.lock().await.entries.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.len().await == 0
	}

	pub async fn state(&self) -> QueueState {
		if self.flushing.load(Ordering::SeqCst) > 0 {
			return QueueState::Flushing;
		}
		if self.buffer.lock().await.entries.is_empty() {
			QueueState::Idle
		} else {
			QueueState::Accumulating
		}
	}

	/// Changes the capacity; a buffer already at the new size flushes now.
	pub async fn set_capacity(&self, capacity: usize) -> Result<()> {
		validate_capacity(capacity)?;
		let mut buffer = self.buffer.lock().await;
		buffer.capacity = capacity;
		if buffer.entries.len() >= capacity {
			if let Some(batch) = buffer.detach(FlushTrigger::Capacity) {
				debug!(count = batch.len(), capacity = capacity, "capacity lowered, detaching batch");
				self.dispatch(batch);
			}
		}
		drop(buffer);
		self.timer_changed.notify_one();
		Ok(())
	}

	/// Changes the interval; an armed timer restarts from now.
	pub async fn set_interval(&self, interval: Duration) -> Result<()> {
		validate_interval_ms(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX))?;
		let restarted = Instant::now().checked_add(interval).ok_or_else(|| {
			ConfigError::invalid_value("queue.interval_ms", "interval is too large")
		})?;
		let mut buffer = self.buffer.lock().await;
		buffer.interval = interval;
		if buffer.deadline.is_some() {
			buffer.deadline = Some(restarted);
		}
		drop(buffer);
		self.timer_changed.notify_one();
		Ok(())
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Refuses further enqueues and detaches everything still pending.
	///
	/// Returns the buffer as an exit batch, plus any capacity batches no
	/// worker has picked up yet.
	pub async fn close(&self) -> Vec<FlushBatch> {
		self.closed.store(true, Ordering::SeqCst);

		// Capacity batches are dispatched under the buffer lock, so holding it
		// here means the channel cannot gain another batch while draining.
		let mut buffer = self.buffer.lock().await;
		let mut pending = Vec::new();
		if let Some(rx) = self.ready_rx.lock().await.as_mut() {
			while let Ok(mut batch) = rx.try_recv() {
				batch.trigger = FlushTrigger::Exit;
				pending.push(batch);
			}
		}
		if let Some(batch) = buffer.detach(FlushTrigger::Exit) {
			pending.push(batch);
		}
		drop(buffer);

		self.timer_changed.notify_one();
		pending
	}

	fn dispatch(&self, batch: FlushBatch) {
		if let Err(mpsc::error::SendError(batch)) = self.ready_tx.send(batch) {
			// Only after the worker has exited.
			warn!(count = batch.len(), "flush channel closed, batch dropped");
		}
	}

	async fn take_due(&self) -> Option<FlushBatch> {
		let mut buffer = self.buffer.lock().await;
		match buffer.deadline {
			Some(deadline) if deadline <= Instant::now() => buffer.detach(FlushTrigger::Interval),
			_ => None,
		}
	}

	async fn hand_off(&self, handler: &dyn FlushHandler, batch: FlushBatch) {
		let trigger = batch.trigger;
		let count = batch.len();
		debug!(trigger = trigger.as_str(), count = count, "flushing deferred events");

		let result = {
			let _flushing = self.begin_flush();
			handler.on_flush(batch).await
		};

		if let Err(e) = result {
			error!(error = %e, trigger = trigger.as_str(), count = count, "failed to flush deferred events");
		}
	}

	/// Runs the flush worker until `cancel` fires.
	///
	/// Capacity batches and interval expiries are delivered through `handler`.
	/// On cancellation, capacity batches still in the channel are delivered as
	/// exit batches; the buffer itself is left for [`DeferredQueue::close`].
	pub async fn run(&self, handler: Arc<dyn FlushHandler>, cancel: CancellationToken) {
		let Some(mut rx) = self.ready_rx.lock().await.take() else {
			warn!("deferred queue worker already running");
			return;
		};

		info!("starting deferred queue worker");

		loop {
			let deadline = self.buffer.lock().await.deadline;
			let timer = async {
				match deadline {
					Some(deadline) => tokio::time::sleep_until(deadline).await,
					None => std::future::pending::<()>().await,
				}
			};

			tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				Some(batch) = rx.recv() => self.hand_off(handler.as_ref(), batch).await,
				_ = self.timer_changed.notified() => {}
				_ = timer => {
					if let Some(batch) = self.take_due().await {
						self.hand_off(handler.as_ref(), batch).await;
					}
				}
			}
		}

		while let Ok(mut batch) = rx.try_recv() {
			batch.trigger = FlushTrigger::Exit;
			self.hand_off(handler.as_ref(), batch).await;
		}

		info!("deferred queue worker stopped");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	struct ChannelHandler {
		tx: mpsc::UnboundedSender<FlushBatch>,
	}

	#[async_trait]
	impl FlushHandler for ChannelHandler {
		async fn on_flush(&self, batch: FlushBatch) -> Result<()> {
			let _ = self.tx.send(batch);
			Ok(())
		}
	}

	fn config(capacity: usize, interval_ms: u64) -> QueueConfig {
		QueueConfig {
			capacity,
			interval_ms,
		}
	}

	fn event(n: usize) -> Event {
		Event::new("clicks", json!({ "n": n }))
	}

	fn spawn_worker(
		queue: &Arc<DeferredQueue>,
	) -> (
		mpsc::UnboundedReceiver<FlushBatch>,
		CancellationToken,
		tokio::task::JoinHandle<()>,
	) {
		let (tx, rx) = mpsc::unbounded_channel();
		let cancel = CancellationToken::new();
		let worker_queue = Arc::clone(queue);
		let worker_cancel = cancel.clone();
		let handle = tokio::spawn(async move {
			worker_queue
				.run(Arc::new(ChannelHandler { tx }), worker_cancel)
				.await;
		});
		(rx, cancel, handle)
	}

	#[test]
	fn test_zero_capacity_is_rejected() {
		assert!(matches!(
			DeferredQueue::new(config(0, 1000)),
			Err(TrackingError::Config(_))
		));
	}

	#[test]
	fn test_zero_interval_is_rejected() {
		assert!(matches!(
			DeferredQueue::new(config(10, 0)),
			Err(TrackingError::Config(_))
		));
	}

	#[tokio::test(start_paused = true)]
	async fn test_capacity_flush_carries_exactly_capacity() {
		let queue = Arc::new(DeferredQueue::new(config(5, 60_000)).unwrap());
		let (mut rx, _cancel, _handle) = spawn_worker(&queue);

		for n in 0..5 {
			queue.enqueue(event(n)).await.unwrap();
		}
		assert_eq!(queue.len().await, 0, "buffer empty right after capacity flush");

		let batch = rx.recv().await.unwrap();
		assert_eq!(batch.trigger, FlushTrigger::Capacity);
		assert_eq!(batch.len(), 5);

		tokio::time::advance(Duration::from_secs(120)).await;
		tokio::task::yield_now().await;
		assert!(rx.try_recv().is_err(), "no further flush expected");
	}

	#[tokio::test(start_paused = true)]
	async fn test_interval_flush_carries_single_event() {
		let queue = Arc::new(DeferredQueue::new(config(100, 1_000)).unwrap());
		let (mut rx, _cancel, _handle) = spawn_worker(&queue);

		queue.enqueue(event(1)).await.unwrap();
		assert_eq!(queue.state().await, QueueState::Accumulating);

		let batch = rx.recv().await.unwrap();
		assert_eq!(batch.trigger, FlushTrigger::Interval);
		assert_eq!(batch.len(), 1);
		assert_eq!(queue.state().await, QueueState::Idle);

		tokio::time::advance(Duration::from_secs(10)).await;
		tokio::task::yield_now().await;
		assert!(rx.try_recv().is_err(), "exactly one interval flush");
	}

	#[tokio::test(start_paused = true)]
	async fn test_interval_does_not_fire_early() {
		let queue = Arc::new(DeferredQueue::new(config(100, 1_000)).unwrap());
		let (mut rx, _cancel, _handle) = spawn_worker(&queue);

		queue.enqueue(event(1)).await.unwrap();
		tokio::time::advance(Duration::from_millis(999)).await;
		tokio::task::yield_now().await;
		assert!(rx.try_recv().is_err());
		assert_eq!(queue.len().await, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_empty_queue_never_flushes() {
		let queue = Arc::new(DeferredQueue::new(config(10, 100)).unwrap());
		let (mut rx, _cancel, _handle) = spawn_worker(&queue);

		tokio::time::advance(Duration::from_secs(5)).await;
		tokio::task::yield_now().await;
		assert!(rx.try_recv().is_err());
		assert_eq!(queue.state().await, QueueState::Idle);
	}

	#[tokio::test(start_paused = true)]
	async fn test_no_loss_across_capacity_boundary() {
		let queue = Arc::new(DeferredQueue::new(config(4, 60_000)).unwrap());
		let (mut rx, _cancel, _handle) = spawn_worker(&queue);

		for n in 0..11 {
			queue.enqueue(event(n)).await.unwrap();
		}

		let mut seen: Vec<u64> = Vec::new();
		for _ in 0..2 {
			let batch = rx.recv().await.unwrap();
			assert_eq!(batch.len(), 4);
			seen.extend(batch.events().map(|e| e.payload["n"].as_u64().unwrap()));
		}
		let rest = queue.flush().await.unwrap();
		seen.extend(rest.events().map(|e| e.payload["n"].as_u64().unwrap()));

		assert_eq!(seen, (0..11).collect::<Vec<u64>>());
	}

	#[tokio::test]
	async fn test_manual_flush_detaches_and_clears() {
		let queue = DeferredQueue::new(config(10, 60_000)).unwrap();
		queue.enqueue(event(1)).await.unwrap();
		queue.enqueue(event(2)).await.unwrap();

		let batch = queue.flush().await.unwrap();
		assert_eq!(batch.trigger, FlushTrigger::Manual);
		assert_eq!(batch.len(), 2);
		assert!(queue.is_empty().await);
		assert!(queue.flush().await.is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn test_manual_flush_disarms_timer() {
		let queue = Arc::new(DeferredQueue::new(config(10, 1_000)).unwrap());
		let (mut rx, _cancel, _handle) = spawn_worker(&queue);

		queue.enqueue(event(1)).await.unwrap();
		queue.flush().await.unwrap();

		tokio::time::advance(Duration::from_secs(2)).await;
		tokio::task::yield_now().await;
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_lowering_capacity_flushes_full_buffer() {
		let queue = DeferredQueue::new(config(10, 60_000)).unwrap();
		for n in 0..3 {
			queue.enqueue(event(n)).await.unwrap();
		}

		queue.set_capacity(2).await.unwrap();
		assert!(queue.is_empty().await);

		let pending = queue.close().await;
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].len(), 3);
		assert_eq!(pending[0].trigger, FlushTrigger::Exit);
	}

	#[tokio::test]
	async fn test_invalid_runtime_settings_are_rejected() {
		let queue = DeferredQueue::new(config(10, 60_000)).unwrap();
		assert!(queue.set_capacity(0).await.is_err());
		assert!(queue.set_interval(Duration::ZERO).await.is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn test_oversized_interval_is_rejected_without_change() {
		let queue = Arc::new(DeferredQueue::new(config(10, 1_000)).unwrap());
		let (mut rx, _cancel, _handle) = spawn_worker(&queue);

		queue.enqueue(event(1)).await.unwrap();
		let result = queue.set_interval(Duration::MAX).await;
		assert!(matches!(result, Err(TrackingError::Config(_))));

		queue.enqueue(event(2)).await.unwrap();
		let batch = rx.recv().await.unwrap();
		assert_eq!(batch.trigger, FlushTrigger::Interval);
		assert_eq!(batch.len(), 2);
	}

	#[tokio::test]
	async fn test_flush_guard_holds_flushing_state() {
		let queue = DeferredQueue::new(config(10, 60_000)).unwrap();
		queue.enqueue(event(1)).await.unwrap();

		let guard = queue.begin_flush();
		assert_eq!(queue.state().await, QueueState::Flushing);
		drop(guard);
		assert_eq!(queue.state().await, QueueState::Accumulating);
	}

	#[tokio::test(start_paused = true)]
	async fn test_set_interval_restarts_armed_timer() {
		let queue = Arc::new(DeferredQueue::new(config(10, 60_000)).unwrap());
		let (mut rx, _cancel, _handle) = spawn_worker(&queue);

		queue.enqueue(event(1)).await.unwrap();
		queue.set_interval(Duration::from_millis(500)).await.unwrap();

		let batch = rx.recv().await.unwrap();
		assert_eq!(batch.trigger, FlushTrigger::Interval);
	}

	#[tokio::test]
	async fn test_close_refuses_enqueue_and_returns_buffer() {
		let queue = DeferredQueue::new(config(10, 60_000)).unwrap();
		queue.enqueue(event(1)).await.unwrap();

		let pending = queue.close().await;
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].trigger, FlushTrigger::Exit);

		let result = queue.enqueue(event(2)).await;
		assert!(matches!(result, Err(TrackingError::ClientShutdown)));
	}

	#[tokio::test(start_paused = true)]
	async fn test_worker_stops_on_cancel() {
		let queue = Arc::new(DeferredQueue::new(config(10, 1_000)).unwrap());
		let (_rx, cancel, handle) = spawn_worker(&queue);

		cancel.cancel();
		handle.await.unwrap();
	}
}
