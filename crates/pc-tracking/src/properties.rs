// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Helper for assembling event payloads.

use pc_tracking_core::{deep_extend, Event};
use serde_json::{Map, Value};

/// A builder for event payloads.
///
/// # Example
///
/// ```
/// use pc_tracking::Properties;
///
/// let event = Properties::new()
///     .insert("element", serde_json::json!({"id": "checkout"}))
///     .insert("scroll_depth", 0.75)
///     .into_event("clicks");
/// assert_eq!(event.collection, "clicks");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
	inner: Map<String, Value>,
}

impl Properties {
	pub fn new() -> Self {
		Self { inner: Map::new() }
	}

	/// Sets `key`, replacing any previous value.
	pub fn insert<K, V>(mut self, key: K, value: V) -> Self
	where
		K: Into<String>,
		V: Into<Value>,
	{
		self.inner.insert(key.into(), value.into());
		self
	}

	/// Deep-merges `other` into this payload; `other` wins on scalar conflicts.
	pub fn merge(self, other: Properties) -> Self {
		let mut merged = Value::Object(self.inner);
		deep_extend(&mut merged, &Value::Object(other.inner));
		Self::from(merged)
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.inner.get(key)
	}

	pub fn into_value(self) -> Value {
		Value::Object(self.inner)
	}

	/// Builds an event for `collection` with these properties as payload.
	pub fn into_event(self, collection: impl Into<String>) -> Event {
		Event::new(collection, self.into_value())
	}
}

impl From<Properties> for Value {
	fn from(props: Properties) -> Self {
		props.into_value()
	}
}

impl From<Value> for Properties {
	fn from(value: Value) -> Self {
		match value {
			Value::Object(map) => Self { inner: map },
			_ => Self::new(),
		}
	}
}
