// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for configuration handling.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building, loading or validating a tracking configuration.
///
/// Every variant is raised eagerly at setup time; the pipeline never coerces an
/// invalid value into a valid one.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("invalid value for {field}: {message}")]
	InvalidValue { field: String, message: String },

	#[error("conflicting configuration: {0}")]
	Conflict(String),

	#[error("failed to parse {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

impl ConfigError {
	pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
		Self::InvalidValue {
			field: field.into(),
			message: message.into(),
		}
	}

	/// Returns the offending field for `InvalidValue` errors.
	pub fn field(&self) -> Option<&str> {
		match self {
			Self::InvalidValue { field, .. } => Some(field),
			_ => None,
		}
	}
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
