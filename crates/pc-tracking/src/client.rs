// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracker client: the host-facing facade over the pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pc_tracking_core::{
	resolve_delivery_mode, CacheConfig, CacheStorage, DeliveryMode, Event, RequestType,
	RetryPolicy, TrackingConfig,
};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::clock::Clock;
use crate::dedup::{DedupStore, SqliteStore};
use crate::error::{Result, TrackingError};
use crate::extensions::{Extension, Extensions};
use crate::hook::{ErrorHook, SharedErrorHook};
use crate::pipeline::{Pipeline, RecordOutcome};
use crate::queue::{FlushBatch, FlushHandler};
use crate::transport::{DeliveryResponse, HttpTransport, Transport};

/// Builder for creating a [`Tracker`].
pub struct TrackerBuilder {
	config: TrackingConfig,
	transport: Option<Arc<dyn Transport>>,
	dedup_store: Option<Arc<dyn DedupStore>>,
	error_hook: Option<SharedErrorHook>,
	clock: Option<Arc<dyn Clock>>,
}

impl TrackerBuilder {
	pub fn new() -> Self {
		Self {
			config: TrackingConfig::default(),
			transport: None,
			dedup_store: None,
			error_hook: None,
			clock: None,
		}
	}

	/// Replaces the whole configuration, e.g. one loaded from TOML.
	pub fn config(mut self, config: TrackingConfig) -> Self {
		self.config = config;
		self
	}

	/// Sets the collection endpoint base URL and project.
	///
	/// Example: `https://collect.example.com/3.0`
	pub fn endpoint(mut self, base_url: impl Into<String>, project_id: impl Into<String>) -> Self {
		self.config.endpoint.base_url = base_url.into();
		self.config.endpoint.project_id = project_id.into();
		self
	}

	pub fn write_key(mut self, key: impl Into<String>) -> Self {
		self.config.endpoint.write_key = Some(key.into());
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.config.endpoint.request_timeout_ms = duration_ms(timeout);
		self
	}

	/// Events buffered before a capacity flush.
	pub fn queue_capacity(mut self, capacity: usize) -> Self {
		self.config.queue.capacity = capacity;
		self
	}

	/// Time after the first buffered event before an interval flush.
	pub fn queue_interval(mut self, interval: Duration) -> Self {
		self.config.queue.interval_ms = duration_ms(interval);
		self
	}

	pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.config.retry = policy;
		self
	}

	/// Enables or disables duplicate suppression.
	pub fn unique(mut self, unique: bool) -> Self {
		self.config.unique = unique;
		self
	}

	pub fn cache(mut self, cache: CacheConfig) -> Self {
		self.config.cache = cache;
		self
	}

	pub fn request_type(mut self, request_type: RequestType) -> Self {
		self.config.request_type = request_type;
		self
	}

	pub fn opt_out(mut self, opt_out: bool) -> Self {
		self.config.opt_out = opt_out;
		self
	}

	/// Replaces the HTTP transport. Endpoint settings are then not required.
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Replaces the dedup backend selected by `cache.storage`.
	pub fn dedup_store(mut self, store: Arc<dyn DedupStore>) -> Self {
		self.dedup_store = Some(store);
		self
	}

	pub fn error_hook<H: ErrorHook>(mut self, hook: H) -> Self {
		self.error_hook = Some(Arc::new(hook));
		self
	}

	pub fn shared_error_hook(mut self, hook: SharedErrorHook) -> Self {
		self.error_hook = Some(hook);
		self
	}

	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	/// Builds the Tracker.
	///
	/// This opens the dedup store and starts the deferred queue worker, so it
	/// must run inside a tokio runtime.
	pub async fn build(self) -> Result<Tracker> {
		let config = self.config;
		config.validate()?;

		let mode = resolve_delivery_mode(config.request_type, self.error_hook.is_some())?;

		let transport: Arc<dyn Transport> = match self.transport {
			Some(transport) => transport,
			None => Arc::new(HttpTransport::new(&config.endpoint)?),
		};

		let mut pipeline = Pipeline::new(&config, mode, transport)?;

		let store: Option<Arc<dyn DedupStore>> = match (self.dedup_store, config.cache.storage) {
			(Some(store), _) => Some(store),
			(None, CacheStorage::Sqlite) if config.unique => {
				let store = SqliteStore::open(&config.cache).await?;
				Some(Arc::new(store) as Arc<dyn DedupStore>)
			}
			(None, _) => None,
		};
		if let Some(store) = store {
			pipeline = pipeline.with_store(store);
		}
		if let Some(clock) = self.clock {
			pipeline = pipeline.with_clock(clock);
		}
		let pipeline = Arc::new(pipeline);

		let handler: Arc<dyn FlushHandler> = Arc::new(ReportingFlushHandler {
			pipeline: Arc::clone(&pipeline),
			error_hook: self.error_hook.clone(),
		});
		let queue = pipeline.queue();
		let cancel = pipeline.cancel_token();
		let worker_handle = tokio::spawn(async move {
			queue.run(handler, cancel).await;
		});

		info!(
			base_url = %config.endpoint.base_url,
			mode = %mode,
			unique = config.unique,
			"tracker initialized"
		);

		Ok(Tracker {
			pipeline,
			extensions: RwLock::new(Extensions::new()),
			error_hook: self.error_hook,
			worker_handle: RwLock::new(Some(worker_handle)),
			auto_tracking: AtomicBool::new(false),
			pageview_fired: AtomicBool::new(false),
			closed: AtomicBool::new(false),
		})
	}
}

impl Default for TrackerBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn duration_ms(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Forwards background flush failures to the error hook.
struct ReportingFlushHandler {
	pipeline: Arc<Pipeline>,
	error_hook: Option<SharedErrorHook>,
}

#[async_trait]
impl FlushHandler for ReportingFlushHandler {
	async fn on_flush(&self, batch: FlushBatch) -> Result<()> {
		let result = self.pipeline.on_flush(batch).await;
		if let (Err(e), Some(hook)) = (&result, &self.error_hook) {
			hook.on_error(e).await;
		}
		result
	}
}

/// Records behavioral events with dedup, deferred batching and retries.
///
/// # Example
///
/// ```ignore
/// use pc_tracking::{Properties, Tracker};
/// use std::time::Duration;
///
/// let tracker = Tracker::builder()
///     .endpoint("https://collect.example.com/3.0", "proj_1")
///     .write_key("wk_xxx")
///     .queue_interval(Duration::from_secs(10))
///     .build()
///     .await?;
///
/// tracker
///     .record_event(Properties::new().insert("element", "checkout").into_event("clicks"))
///     .await?;
///
/// tracker
///     .defer_event(Properties::new().insert("field", "email").into_event("changes"))
///     .await?;
///
/// // Sends whatever is still buffered, then stops the worker.
/// tracker.shutdown().await?;
/// ```
pub struct Tracker {
	pipeline: Arc<Pipeline>,
	extensions: RwLock<Extensions>,
	error_hook: Option<SharedErrorHook>,
	worker_handle: RwLock<Option<JoinHandle<()>>>,
	auto_tracking: AtomicBool,
	pageview_fired: AtomicBool,
	closed: AtomicBool,
}

impl Tracker {
	pub fn builder() -> TrackerBuilder {
		TrackerBuilder::new()
	}

	/// Delivery mode resolved at build time.
	pub fn mode(&self) -> DeliveryMode {
		self.pipeline.mode()
	}

	/// Delivers one event immediately.
	///
	/// A live duplicate resolves to [`RecordOutcome::Suppressed`] without
	/// contacting the endpoint.
	pub async fn record_event(&self, event: Event) -> Result<RecordOutcome> {
		self.check_closed()?;
		let event = self.extensions.read().await.apply(event);
		let result = self.pipeline.record_event(event).await;
		self.report(result).await
	}

	/// Delivers the non-duplicate events as one batch.
	pub async fn record_events(&self, events: Vec<Event>) -> Result<RecordOutcome> {
		self.check_closed()?;
		let events = self.apply_extensions(events).await;
		let result = self.pipeline.record_events(events).await;
		self.report(result).await
	}

	/// Buffers one event for the next flush.
	pub async fn defer_event(&self, event: Event) -> Result<RecordOutcome> {
		self.check_closed()?;
		let event = self.extensions.read().await.apply(event);
		let result = self.pipeline.defer_event(event).await;
		self.report(result).await
	}

	pub async fn defer_events(&self, events: Vec<Event>) -> Result<Vec<RecordOutcome>> {
		self.check_closed()?;
		let events = self.apply_extensions(events).await;
		let result = self.pipeline.defer_events(events).await;
		self.report(result).await
	}

	/// Sends the deferred buffer now. `None` when it was empty.
	pub async fn flush(&self) -> Result<Option<DeliveryResponse>> {
		self.check_closed()?;
		let result = self.pipeline.flush().await;
		self.report(result).await
	}

	/// Sends one event fire-and-forget, for use while the host is exiting.
	pub async fn record_exit_event(&self, event: Event) -> Result<RecordOutcome> {
		self.check_closed()?;
		let event = self.extensions.read().await.apply(event);
		let result = self.pipeline.record_exit_event(event).await;
		self.report(result).await
	}

	/// Adds fields to every event recorded after this call.
	pub async fn extend_events(&self, extension: Extension) {
		self.extensions.write().await.extend_events(extension);
	}

	/// Adds fields to events of `collection` recorded after this call.
	pub async fn extend_event(&self, collection: impl Into<String>, extension: Extension) {
		self.extensions.write().await.extend_event(collection, extension);
	}

	pub fn set_opt_out(&self, opted_out: bool) {
		self.pipeline.set_opt_out(opted_out);
	}

	pub fn is_opted_out(&self) -> bool {
		self.pipeline.is_opted_out()
	}

	pub async fn set_queue_capacity(&self, capacity: usize) -> Result<()> {
		self.check_closed()?;
		self.pipeline.queue().set_capacity(capacity).await
	}

	pub async fn set_queue_interval(&self, interval: Duration) -> Result<()> {
		self.check_closed()?;
		self.pipeline.queue().set_interval(interval).await
	}

	/// Marks auto-tracking as set up on this tracker.
	///
	/// Fails with [`TrackingError::AlreadyInitialized`] on every call after the first.
	pub fn claim_auto_tracking(&self) -> Result<()> {
		if self.auto_tracking.swap(true, Ordering::SeqCst) {
			return Err(TrackingError::AlreadyInitialized);
		}
		Ok(())
	}

	/// Returns true only the first time it is called.
	pub fn claim_pageview(&self) -> bool {
		!self.pageview_fired.swap(true, Ordering::SeqCst)
	}

	/// Returns the number of events currently buffered.
	pub async fn queue_len(&self) -> usize {
		self.pipeline.queue().len().await
	}

	/// Shuts down the tracker.
	///
	/// Buffered events are sent fire-and-forget, pending retries are
	/// cancelled and the queue worker is awaited.
	pub async fn shutdown(&self) -> Result<()> {
		if self.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		info!("Shutting down tracker");

		let sent = self.pipeline.teardown().await?;

		if let Some(handle) = self.worker_handle.write().await.take() {
			if let Err(e) = handle.await {
				error!(error = %e, "Error waiting for queue worker to complete");
			}
		}

		info!(exit_flush = sent, "Tracker shutdown complete");
		Ok(())
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	fn check_closed(&self) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(TrackingError::ClientShutdown);
		}
		Ok(())
	}

	async fn apply_extensions(&self, events: Vec<Event>) -> Vec<Event> {
		let extensions = self.extensions.read().await;
		events.into_iter().map(|event| extensions.apply(event)).collect()
	}

	async fn report<T>(&self, result: Result<T>) -> Result<T> {
		if let (Err(e), Some(hook)) = (&result, &self.error_hook) {
			hook.on_error(e).await;
		}
		result
	}
}

impl Drop for Tracker {
	fn drop(&mut self) {
		// Stops the worker when the tracker is dropped without shutdown().
		self.pipeline.cancel_token().cancel();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::TransportError;
	use crate::transport::Dispatch;
	use serde_json::json;
	use std::sync::atomic::AtomicUsize;
	use std::sync::Mutex;

	#[derive(Default)]
	struct MockTransport {
		fail_with: Option<u16>,
		calls: Mutex<Vec<(Vec<Event>, DeliveryMode)>>,
	}

	#[async_trait]
	impl Transport for MockTransport {
		async fn deliver(
			&self,
			events: &[Event],
			_dispatch: Dispatch,
			mode: DeliveryMode,
		) -> std::result::Result<DeliveryResponse, TransportError> {
			self.calls.lock().unwrap().push((events.to_vec(), mode));
			match self.fail_with {
				Some(status) if mode == DeliveryMode::Observable => Err(TransportError::Status {
					status,
					message: "rejected".to_string(),
				}),
				_ if mode == DeliveryMode::FireAndForget => Ok(DeliveryResponse::unobserved()),
				_ => Ok(DeliveryResponse::observed(201, Some(json!({"created": true})))),
			}
		}
	}

	impl MockTransport {
		fn calls(&self) -> Vec<(Vec<Event>, DeliveryMode)> {
			self.calls.lock().unwrap().clone()
		}
	}

	#[derive(Default)]
	struct CountingHook {
		count: AtomicUsize,
	}

	#[async_trait]
	impl ErrorHook for CountingHook {
		async fn on_error(&self, _error: &TrackingError) {
			self.count.fetch_add(1, Ordering::SeqCst);
		}
	}

	async fn tracker_with(transport: Arc<MockTransport>) -> Tracker {
		Tracker::builder().transport(transport).build().await.unwrap()
	}

	#[tokio::test]
	async fn test_builder_requires_endpoint_without_custom_transport() {
		let result = Tracker::builder().build().await;
		assert!(matches!(result, Err(TrackingError::Config(_))));
	}

	#[tokio::test]
	async fn test_builder_rejects_beacon_with_error_hook() {
		let result = Tracker::builder()
			.transport(Arc::new(MockTransport::default()))
			.request_type(RequestType::Beacon)
			.error_hook(CountingHook::default())
			.build()
			.await;

		assert!(matches!(result, Err(TrackingError::Config(_))));
	}

	#[tokio::test]
	async fn test_jsonp_resolves_by_hook_presence() {
		let without = Tracker::builder()
			.transport(Arc::new(MockTransport::default()))
			.request_type(RequestType::Jsonp)
			.build()
			.await
			.unwrap();
		assert_eq!(without.mode(), DeliveryMode::FireAndForget);

		let with = Tracker::builder()
			.transport(Arc::new(MockTransport::default()))
			.request_type(RequestType::Jsonp)
			.error_hook(CountingHook::default())
			.build()
			.await
			.unwrap();
		assert_eq!(with.mode(), DeliveryMode::Observable);
	}

	#[tokio::test]
	async fn test_builder_rejects_zero_capacity() {
		let result = Tracker::builder()
			.transport(Arc::new(MockTransport::default()))
			.queue_capacity(0)
			.build()
			.await;
		assert!(matches!(result, Err(TrackingError::Config(_))));
	}

	#[tokio::test]
	async fn test_record_event_returns_response() {
		let transport = Arc::new(MockTransport::default());
		let tracker = tracker_with(transport.clone()).await;

		let outcome = tracker
			.record_event(Event::new("clicks", json!({"id": "buy"})))
			.await
			.unwrap();

		match outcome {
			RecordOutcome::Delivered(response) => {
				assert_eq!(response.status, Some(201));
				assert_eq!(response.body, Some(json!({"created": true})));
			}
			other => panic!("unexpected outcome: {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_extensions_are_applied_before_dedup() {
		let transport = Arc::new(MockTransport::default());
		let tracker = tracker_with(transport.clone()).await;
		tracker
			.extend_event("clicks", Extension::fixed(json!({"page": "/home"})))
			.await;

		tracker.record_event(Event::new("clicks", json!({"id": "a"}))).await.unwrap();
		let second = tracker
			.record_event(Event::new("clicks", json!({"id": "a", "page": "/home"})))
			.await
			.unwrap();

		assert_eq!(second, RecordOutcome::Suppressed);
		let calls = transport.calls();
		assert_eq!(calls.len(), 1);
		assert_eq!(calls[0].0[0].payload, json!({"id": "a", "page": "/home"}));
	}

	#[tokio::test]
	async fn test_error_hook_receives_terminal_failures() {
		let transport = Arc::new(MockTransport {
			fail_with: Some(400),
			..Default::default()
		});
		let hook = Arc::new(CountingHook::default());
		let tracker = Tracker::builder()
			.transport(transport.clone())
			.shared_error_hook(hook.clone())
			.build()
			.await
			.unwrap();

		let err = tracker
			.record_event(Event::new("clicks", json!({})))
			.await
			.unwrap_err();

		assert_eq!(err.status(), Some(400));
		assert_eq!(hook.count.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_auto_tracking_claimed_once_per_instance() {
		let first = tracker_with(Arc::new(MockTransport::default())).await;
		let second = tracker_with(Arc::new(MockTransport::default())).await;

		assert!(first.claim_auto_tracking().is_ok());
		assert!(matches!(
			first.claim_auto_tracking(),
			Err(TrackingError::AlreadyInitialized)
		));
		assert!(second.claim_auto_tracking().is_ok());

		assert!(first.claim_pageview());
		assert!(!first.claim_pageview());
	}

	#[tokio::test]
	async fn test_queue_tuning_is_validated() {
		let tracker = tracker_with(Arc::new(MockTransport::default())).await;

		assert!(tracker.set_queue_capacity(0).await.is_err());
		assert!(tracker.set_queue_interval(Duration::ZERO).await.is_err());
		assert!(tracker.set_queue_capacity(10).await.is_ok());
		assert!(tracker.set_queue_interval(Duration::from_secs(1)).await.is_ok());

		tracker.defer_event(Event::new("clicks", json!({}))).await.unwrap();
		let result = tracker.set_queue_interval(Duration::MAX).await;
		assert!(matches!(result, Err(TrackingError::Config(_))));
		assert_eq!(tracker.queue_len().await, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_interval_flush_runs_in_background() {
		let transport = Arc::new(MockTransport::default());
		let tracker = Tracker::builder()
			.transport(transport.clone())
			.queue_interval(Duration::from_millis(500))
			.build()
			.await
			.unwrap();

		tracker.defer_event(Event::new("changes", json!({"n": 1}))).await.unwrap();
		tracker.defer_event(Event::new("changes", json!({"n": 2}))).await.unwrap();
		assert_eq!(tracker.queue_len().await, 2);

		tokio::time::sleep(Duration::from_millis(501)).await;
		tokio::task::yield_now().await;

		let calls = transport.calls();
		assert_eq!(calls.len(), 1);
		assert_eq!(calls[0].0.len(), 2);
		assert_eq!(calls[0].1, DeliveryMode::Observable);
		assert_eq!(tracker.queue_len().await, 0);
	}

	#[tokio::test]
	async fn test_shutdown_sends_buffer_and_rejects_calls() {
		let transport = Arc::new(MockTransport::default());
		let tracker = tracker_with(transport.clone()).await;

		tracker
			.defer_events(vec![
				Event::new("clicks", json!({"n": 1})),
				Event::new("clicks", json!({"n": 2})),
			])
			.await
			.unwrap();

		tracker.shutdown().await.unwrap();
		assert!(tracker.is_closed());

		let calls = transport.calls();
		assert_eq!(calls.len(), 1);
		assert_eq!(calls[0].1, DeliveryMode::FireAndForget);

		let result = tracker.record_event(Event::new("clicks", json!({}))).await;
		assert!(matches!(result, Err(TrackingError::ClientShutdown)));
		assert!(tracker.shutdown().await.is_ok());
	}
}
