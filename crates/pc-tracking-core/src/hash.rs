// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deterministic event hashing for duplicate suppression.
//!
//! The hash input is the canonical JSON of `{collection, payload}` with the
//! [`VOLATILE_FIELDS`] removed from the top level of the payload. Object keys
//! are emitted in sorted order at every depth, so two structurally identical
//! payloads hash identically regardless of insertion order.
//!
//! Without a [`HashingMethod`] the canonical string itself is the key; with one
//! the key is the lowercase hex digest of that string.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::event::{Event, VOLATILE_FIELDS};

/// Named digest algorithm applied to the canonical event string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashingMethod {
	Md5,
	Sha256,
}

impl HashingMethod {
	pub fn as_str(&self) -> &'static str {
		match self {
			HashingMethod::Md5 => "md5",
			HashingMethod::Sha256 => "sha256",
		}
	}

	fn digest(&self, input: &str) -> String {
		match self {
			HashingMethod::Md5 => format!("{:x}", md5::compute(input.as_bytes())),
			HashingMethod::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
		}
	}
}

impl std::fmt::Display for HashingMethod {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for HashingMethod {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"md5" => Ok(HashingMethod::Md5),
			"sha256" | "sha-256" => Ok(HashingMethod::Sha256),
			other => Err(format!("unknown hashing method: {other}")),
		}
	}
}

/// Dedup cache key for an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventHash(String);

impl EventHash {
	/// Computes the hash of the event's semantically relevant fields.
	pub fn compute(event: &Event, method: Option<HashingMethod>) -> Self {
		let canonical = canonical_event_string(event);
		match method {
			Some(method) => Self(method.digest(&canonical)),
			None => Self(canonical),
		}
	}

	/// Wraps an already computed key, e.g. one read back from a store.
	pub fn from_raw(raw: impl Into<String>) -> Self {
		Self(raw.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_inner(self) -> String {
		self.0
	}
}

impl std::fmt::Display for EventHash {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

fn canonical_event_string(event: &Event) -> String {
	let payload = match &event.payload {
		Value::Object(map) => {
			let mut map = map.clone();
			for field in VOLATILE_FIELDS {
				map.remove(*field);
			}
			Value::Object(map)
		}
		other => other.clone(),
	};

	let mut out = String::with_capacity(64);
	out.push_str("{\"collection\":");
	write_canonical(&Value::String(event.collection.clone()), &mut out);
	out.push_str(",\"payload\":");
	write_canonical(&payload, &mut out);
	out.push('}');
	out
}

/// Serializes a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
	let mut out = String::new();
	write_canonical(value, &mut out);
	out
}

fn write_canonical(value: &Value, out: &mut String) {
	match value {
		Value::Object(map) => {
			let mut keys: Vec<&String> = map.keys().collect();
			keys.sort();
			out.push('{');
			for (i, key) in keys.into_iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_canonical(&Value::String(key.clone()), out);
				out.push(':');
				write_canonical(&map[key], out);
			}
			out.push('}');
		}
		Value::Array(items) => {
			out.push('[');
			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_canonical(item, out);
			}
			out.push(']');
		}
		// Scalars have exactly one serde_json rendering.
		scalar => out.push_str(&scalar.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use serde_json::json;

	#[test]
	fn key_order_does_not_change_hash() {
		let a = Event::new("clicks", json!({"a": 1, "b": {"c": 2, "d": [1, 2]}}));
		let b = Event::new("clicks", json!({"b": {"d": [1, 2], "c": 2}, "a": 1}));
		assert_eq!(EventHash::compute(&a, None), EventHash::compute(&b, None));
		assert_eq!(
			EventHash::compute(&a, Some(HashingMethod::Md5)),
			EventHash::compute(&b, Some(HashingMethod::Md5))
		);
	}

	#[test]
	fn volatile_fields_are_ignored() {
		let a = Event::new(
			"clicks",
			json!({"element": "a", "local_time_full": "2025-01-01T00:00:00Z"}),
		);
		let b = Event::new(
			"clicks",
			json!({"element": "a", "local_time_full": "2025-01-01T00:00:09Z"}),
		);
		assert_eq!(EventHash::compute(&a, None), EventHash::compute(&b, None));
	}

	#[test]
	fn collection_is_part_of_the_hash() {
		let a = Event::new("clicks", json!({"x": 1}));
		let b = Event::new("changes", json!({"x": 1}));
		assert_ne!(EventHash::compute(&a, None), EventHash::compute(&b, None));
	}

	#[test]
	fn array_order_is_significant() {
		let a = Event::new("clicks", json!({"x": [1, 2]}));
		let b = Event::new("clicks", json!({"x": [2, 1]}));
		assert_ne!(EventHash::compute(&a, None), EventHash::compute(&b, None));
	}

	#[test]
	fn unset_method_uses_canonical_string() {
		let event = Event::new("clicks", json!({"b": 1, "a": "x"}));
		assert_eq!(
			EventHash::compute(&event, None).as_str(),
			r#"{"collection":"clicks","payload":{"a":"x","b":1}}"#
		);
	}

	#[test]
	fn digests_have_expected_width() {
		let event = Event::new("clicks", json!({}));
		assert_eq!(
			EventHash::compute(&event, Some(HashingMethod::Md5))
				.as_str()
				.len(),
			32
		);
		assert_eq!(
			EventHash::compute(&event, Some(HashingMethod::Sha256))
				.as_str()
				.len(),
			64
		);
	}

	#[test]
	fn hashing_method_parses() {
		assert_eq!("MD5".parse::<HashingMethod>(), Ok(HashingMethod::Md5));
		assert_eq!("sha256".parse::<HashingMethod>(), Ok(HashingMethod::Sha256));
		assert!("crc32".parse::<HashingMethod>().is_err());
	}

	#[test]
	fn canonical_json_escapes_strings() {
		assert_eq!(canonical_json(&json!({"k\"": "v\n"})), r#"{"k\"":"v\n"}"#);
	}

	proptest! {
		#[test]
		fn insertion_order_never_affects_hash(
			entries in proptest::collection::btree_map("[a-z]{1,8}", 0i64..1000, 1..12),
		) {
			let mut forward = serde_json::Map::new();
			for (k, v) in entries.iter() {
				forward.insert(k.clone(), json!(v));
			}
			let mut reverse = serde_json::Map::new();
			for (k, v) in entries.iter().rev() {
				reverse.insert(k.clone(), json!(v));
			}

			let a = Event::new("clicks", Value::Object(forward));
			let b = Event::new("clicks", Value::Object(reverse));
			prop_assert_eq!(
				EventHash::compute(&a, Some(HashingMethod::Sha256)),
				EventHash::compute(&b, Some(HashingMethod::Sha256))
			);
		}
	}
}
