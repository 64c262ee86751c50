// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event records handed to the delivery pipeline.
//!
//! An [`Event`] is a collection name plus an arbitrary JSON payload. Events are
//! immutable once built; the pipeline takes ownership when one is recorded or
//! deferred.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an event.
///
/// Uses UUIDv7 so identifiers sort by creation time in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
	pub fn new() -> Self {
		let uuid7_val = uuid7::uuid7();
		Self(Uuid::from_bytes(*uuid7_val.as_bytes()))
	}
}

impl Default for EventId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for EventId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for EventId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// A single observed interaction destined for the collection endpoint.
///
/// # Example
///
/// ```
/// use pc_tracking_core::Event;
///
/// let event = Event::new("clicks", serde_json::json!({
///     "element": { "id": "checkout" },
/// }));
/// assert_eq!(event.collection, "clicks");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	pub id: EventId,
	pub collection: String,
	pub payload: serde_json::Value,
	pub created_at: DateTime<Utc>,
}

impl Event {
	pub fn new(collection: impl Into<String>, payload: serde_json::Value) -> Self {
		Self {
			id: EventId::new(),
			collection: collection.into(),
			payload,
			created_at: Utc::now(),
		}
	}

	/// Overrides the creation timestamp (builder pattern).
	pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
		self.created_at = created_at;
		self
	}

	/// Replaces the payload, keeping id and timestamp.
	pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
		self.payload = payload;
		self
	}
}

/// Payload fields that change on every emission and never take part in
/// duplicate detection.
pub const VOLATILE_FIELDS: &[&str] = &["local_time_full"];

/// Maximum allowed length for collection names.
pub const MAX_COLLECTION_NAME_LENGTH: usize = 256;

/// Maximum allowed size for a serialized payload (1 MB).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Validates a collection name.
///
/// Valid names must:
/// - Be non-empty and at most 256 characters
/// - Not start with `$` (reserved by the collection endpoint)
/// - Not contain `.` or control characters
pub fn validate_collection_name(name: &str) -> bool {
	if name.is_empty() || name.chars().count() > MAX_COLLECTION_NAME_LENGTH {
		return false;
	}

	if name.starts_with('$') {
		return false;
	}

	!name.chars().any(|c| c == '.' || c.is_control())
}

/// Validates that the serialized payload is within the size limit.
pub fn validate_payload_size(payload: &serde_json::Value) -> bool {
	serde_json::to_string(payload)
		.map(|s| s.len() <= MAX_PAYLOAD_SIZE)
		.unwrap_or(false)
}

/// Well-known collections emitted by browser auto-tracking.
pub mod collections {
	pub const CLICKS: &str = "clicks";
	pub const CHANGES: &str = "changes";
	pub const FORM_SUBMISSIONS: &str = "form_submissions";
	pub const PAGEVIEWS: &str = "pageviews";
	pub const ELEMENT_VIEWS: &str = "element_views";
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn event_new_sets_fields() {
		let event = Event::new("clicks", serde_json::json!({"x": 1}));
		assert_eq!(event.collection, "clicks");
		assert_eq!(event.payload["x"], 1);
	}

	#[test]
	fn event_ids_are_unique() {
		let a = Event::new("clicks", serde_json::json!({}));
		let b = Event::new("clicks", serde_json::json!({}));
		assert_ne!(a.id, b.id);
	}

	#[test]
	fn with_payload_keeps_identity() {
		let event = Event::new("clicks", serde_json::json!({}));
		let id = event.id;
		let replaced = event.with_payload(serde_json::json!({"a": true}));
		assert_eq!(replaced.id, id);
		assert_eq!(replaced.payload["a"], true);
	}

	#[test]
	fn validate_collection_name_valid() {
		assert!(validate_collection_name("clicks"));
		assert!(validate_collection_name("form_submissions"));
		assert!(validate_collection_name("Page Views"));
		assert!(validate_collection_name("element-views"));
	}

	#[test]
	fn validate_collection_name_invalid() {
		assert!(!validate_collection_name(""));
		assert!(!validate_collection_name("$pageview"));
		assert!(!validate_collection_name("page.views"));
		assert!(!validate_collection_name("tab\there"));
		assert!(!validate_collection_name(&"a".repeat(257)));
	}

	#[test]
	fn validate_payload_size_too_large() {
		let large = serde_json::json!({"key": "x".repeat(MAX_PAYLOAD_SIZE + 1)});
		assert!(!validate_payload_size(&large));
		assert!(validate_payload_size(&serde_json::json!({"key": "value"})));
	}

	proptest! {
		#[test]
		fn event_id_roundtrip(_seed: u64) {
			let id = EventId::new();
			let parsed: EventId = id.to_string().parse().unwrap();
			prop_assert_eq!(id, parsed);
		}

		#[test]
		fn validate_collection_name_accepts_plain_names(name in "[a-z][a-z0-9_ -]{0,60}") {
			prop_assert!(validate_collection_name(&name));
		}

		#[test]
		fn validate_collection_name_rejects_dollar_prefix(name in r"\$[a-z0-9_]{0,30}") {
			prop_assert!(!validate_collection_name(&name));
		}
	}
}
