// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Recursive merge used to layer extension fields under event payloads.

use serde_json::Value;

/// Merges `source` into `target`.
///
/// - object into object: merged key by key, recursively
/// - array into array: elements of `source` not already present are appended
/// - anything else: `source` replaces `target`
pub fn deep_extend(target: &mut Value, source: &Value) {
	match (target, source) {
		(Value::Object(target_map), Value::Object(source_map)) => {
			for (key, value) in source_map {
				match target_map.get_mut(key) {
					Some(existing) if is_container(value) => deep_extend(existing, value),
					_ => {
						target_map.insert(key.clone(), value.clone());
					}
				}
			}
		}
		(Value::Array(target_items), Value::Array(source_items)) => {
			for item in source_items {
				if !target_items.contains(item) {
					target_items.push(item.clone());
				}
			}
		}
		(target, source) => *target = source.clone(),
	}
}

fn is_container(value: &Value) -> bool {
	matches!(value, Value::Object(_) | Value::Array(_))
}
