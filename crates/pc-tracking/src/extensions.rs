// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fields layered under every event payload before it enters the pipeline.
//!
//! Layers apply in order: global extensions, then extensions registered for
//! the event's collection, then the event's own payload. Later layers win on
//! conflicting keys. Extensions run before hashing, so they take part in
//! duplicate detection.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use pc_tracking_core::{deep_extend, Event};
use serde_json::{Map, Value};

/// A static object or a closure evaluated each time an event is built.
#[derive(Clone)]
pub enum Extension {
	Static(Value),
	Dynamic(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl Extension {
	pub fn fixed(value: impl Into<Value>) -> Self {
		Extension::Static(value.into())
	}

	pub fn dynamic<F>(f: F) -> Self
	where
		F: Fn() -> Value + Send + Sync + 'static,
	{
		Extension::Dynamic(Arc::new(f))
	}

	fn resolve(&self) -> Value {
		match self {
			Extension::Static(value) => value.clone(),
			Extension::Dynamic(f) => f(),
		}
	}
}

impl fmt::Debug for Extension {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Extension::Static(value) => f.debug_tuple("Static").field(value).finish(),
			Extension::Dynamic(_) => f.write_str("Dynamic(..)"),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct Extensions {
	global: Vec<Extension>,
	per_collection: HashMap<String, Vec<Extension>>,
}

impl Extensions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a layer applied to every collection.
	pub fn extend_events(&mut self, extension: Extension) {
		self.global.push(extension);
	}

	/// Adds a layer applied only to `collection`.
	pub fn extend_event(&mut self, collection: impl Into<String>, extension: Extension) {
		self.per_collection
			.entry(collection.into())
			.or_default()
			.push(extension);
	}

	pub fn is_empty(&self) -> bool {
		self.global.is_empty() && self.per_collection.is_empty()
	}

	/// Returns the event with all matching layers merged under its payload.
	pub fn apply(&self, event: Event) -> Event {
		let scoped = self.per_collection.get(&event.collection);
		if self.global.is_empty() && scoped.is_none() {
			return event;
		}

		let mut merged = Value::Object(Map::new());
		for extension in self.global.iter().chain(scoped.into_iter().flatten()) {
			deep_extend(&mut merged, &extension.resolve());
		}
		deep_extend(&mut merged, &event.payload);

		event.with_payload(merged)
	}
}
