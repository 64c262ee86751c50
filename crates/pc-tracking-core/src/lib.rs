// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the pc-tracking event delivery pipeline.
//!
//! This crate holds the pieces shared by the SDK (`pc-tracking`) and anything
//! that produces events for it:
//!
//! - [`Event`]: a collection name plus a JSON payload
//! - [`EventHash`]: the deterministic dedup key of an event
//! - [`deep_extend`]: the merge used to layer extension fields under payloads
//! - [`TrackingConfig`]: configuration with documented defaults, TOML/env
//!   loading and eager validation
//!
//! # Example
//!
//! ```
//! use pc_tracking_core::{Event, EventHash, HashingMethod, TrackingConfig};
//!
//! let config = TrackingConfig::from_toml_str("[queue]\ncapacity = 50").unwrap();
//! config.validate().unwrap();
//!
//! let event = Event::new("clicks", serde_json::json!({"element": "buy"}));
//! let key = EventHash::compute(&event, Some(HashingMethod::Sha256));
//! assert_eq!(key.as_str().len(), 64);
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod extend;
pub mod hash;
pub mod sources;

pub use config::{
	resolve_delivery_mode, validate_capacity, validate_identifier, validate_interval_ms, CacheConfig, CacheStorage,
	DeliveryMode, EndpointConfig, QueueConfig, RequestType, RetryPolicy, TrackingConfig,
};
pub use error::{ConfigError, Result};
pub use event::{
	collections, validate_collection_name, validate_payload_size, Event, EventId,
	MAX_COLLECTION_NAME_LENGTH, MAX_PAYLOAD_SIZE, VOLATILE_FIELDS,
};
pub use extend::deep_extend;
pub use hash::{canonical_json, EventHash, HashingMethod};
pub use sources::ENV_PREFIX;
