// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Rust SDK for recording behavioral events (clicks, form changes, page views)
//! against a collection endpoint.
//!
//! Events pass through a short pipeline before they reach the network:
//!
//! 1. extension fields are layered under the payload
//! 2. a dedup cache suppresses identical events seen within `cache.max_age_ms`
//! 3. the event is either delivered now or buffered in the deferred queue
//! 4. deliveries are retried with exponential backoff on configured statuses
//!
//! # Quick Start
//!
//! ```ignore
//! use pc_tracking::{Properties, Tracker};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tracker = Tracker::builder()
//!         .endpoint("https://collect.example.com/3.0", "proj_1")
//!         .write_key("wk_xxx")
//!         .build()
//!         .await?;
//!
//!     // Delivered now; the response is returned.
//!     tracker.record_event(Properties::new()
//!         .insert("element", "checkout")
//!         .into_event("clicks")
//!     ).await?;
//!
//!     // Buffered; sent when the queue fills up or its interval expires.
//!     tracker.defer_event(Properties::new()
//!         .insert("field", "email")
//!         .into_event("changes")
//!     ).await?;
//!
//!     // Sends anything still buffered, fire-and-forget.
//!     tracker.shutdown().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Deferred Queue
//!
//! ```ignore
//! let tracker = Tracker::builder()
//!     .endpoint("https://collect.example.com/3.0", "proj_1")
//!     .queue_capacity(100)                      // Flush at 100 buffered events
//!     .queue_interval(Duration::from_secs(10))  // Or 10s after the first one
//!     .build()
//!     .await?;
//! ```
//!
//! # Delivery Modes
//!
//! | `request_type` | error hook | mode |
//! |----------------|------------|------|
//! | `fetch` | any | observable, retried |
//! | `beacon` | none | fire-and-forget |
//! | `beacon` | set | rejected at build |
//! | `jsonp` | none | fire-and-forget |
//! | `jsonp` | set | observable, retried |
//!
//! # Error Handling
//!
//! Suppressed duplicates and opted-out calls are successes, reported as
//! [`RecordOutcome::Suppressed`] and [`RecordOutcome::OptedOut`].
//!
//! ```ignore
//! use pc_tracking::{RecordOutcome, TrackingError};
//!
//! match tracker.record_event(event).await {
//!     Ok(RecordOutcome::Delivered(response)) => println!("status {:?}", response.status),
//!     Ok(_) => {}
//!     Err(TrackingError::Delivery { attempts, source }) => {
//!         eprintln!("gave up after {attempts} attempt(s): {source}");
//!     }
//!     Err(e) => eprintln!("Unexpected error: {}", e),
//! }
//! ```

pub mod client;
pub mod clock;
pub mod dedup;
pub mod delivery;
pub mod error;
pub mod extensions;
pub mod hook;
pub mod pipeline;
pub mod properties;
pub mod queue;
pub mod transport;

pub use client::{Tracker, TrackerBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dedup::{DedupCache, DedupStore, MemoryStore, SqliteStore};
pub use delivery::RetryController;
pub use error::{Result, TrackingError, TransportError};
pub use extensions::{Extension, Extensions};
pub use hook::{ErrorHook, NoOpErrorHook, SharedErrorHook};
pub use pipeline::{Pipeline, RecordOutcome};
pub use properties::Properties;
pub use queue::{
	DeferredQueue, FlushBatch, FlushGuard, FlushHandler, FlushTrigger, QueueState, QueuedEvent,
};
pub use transport::{DeliveryResponse, Dispatch, HttpTransport, Transport};

// Re-export types from pc-tracking-core that users may need
pub use pc_tracking_core::{
	collections, CacheConfig, CacheStorage, DeliveryMode, EndpointConfig, Event, EventHash, EventId,
	HashingMethod, QueueConfig, RequestType, RetryPolicy, TrackingConfig,
};
