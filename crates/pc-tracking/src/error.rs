// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the tracking pipeline.

use pc_tracking_core::ConfigError;
use pc_tracking_http::{RetryError, RetryableError};
use thiserror::Error;

/// A single delivery attempt failed.
#[derive(Debug, Error)]
pub enum TransportError {
	/// The endpoint answered with a non-success status.
	#[error("endpoint returned {status}: {message}")]
	Status { status: u16, message: String },

	/// HTTP request failed before a status was observed.
	#[error("HTTP request failed: {0}")]
	Request(#[from] reqwest::Error),

	/// The transport could not be reached at all (connection refused, offline).
	#[error("transport unavailable: {0}")]
	Unavailable(String),
}

impl TransportError {
	pub fn status(&self) -> Option<u16> {
		self.status_code()
	}
}

impl RetryableError for TransportError {
	fn status_code(&self) -> Option<u16> {
		match self {
			TransportError::Status { status, .. } => Some(*status),
			TransportError::Request(e) => e.status_code(),
			_ => None,
		}
	}

	fn is_transient(&self) -> bool {
		match self {
			TransportError::Request(e) => e.is_transient(),
			TransportError::Unavailable(_) => true,
			_ => false,
		}
	}
}

/// Tracking pipeline errors.
#[derive(Debug, Error)]
pub enum TrackingError {
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	/// Delivery failed terminally, either outside the retry set or after the
	/// retry budget was spent.
	#[error("delivery failed after {attempts} attempt(s): {source}")]
	Delivery {
		attempts: u32,
		#[source]
		source: TransportError,
	},

	/// The pipeline was torn down while a retry was pending.
	#[error("delivery cancelled by teardown")]
	Cancelled,

	#[error("failed to build HTTP client: {0}")]
	HttpClient(#[source] reqwest::Error),

	#[error("tracker has been shut down")]
	ClientShutdown,

	#[error("event validation failed: {0}")]
	ValidationFailed(String),

	#[error("dedup store error: {0}")]
	Store(String),

	/// Auto-tracking was already claimed on this tracker instance.
	#[error("auto-tracking already initialized")]
	AlreadyInitialized,
}

impl TrackingError {
	/// Status code of the failed delivery, if one was observed.
	pub fn status(&self) -> Option<u16> {
		match self {
			TrackingError::Delivery { source, .. } => source.status(),
			_ => None,
		}
	}

	/// Number of transport invocations behind a delivery failure.
	pub fn attempts(&self) -> Option<u32> {
		match self {
			TrackingError::Delivery { attempts, .. } => Some(*attempts),
			_ => None,
		}
	}
}

impl From<RetryError<TransportError>> for TrackingError {
	fn from(err: RetryError<TransportError>) -> Self {
		match err {
			RetryError::Rejected { attempts, error } | RetryError::Exhausted { attempts, error } => {
				TrackingError::Delivery {
					attempts,
					source: error,
				}
			}
			RetryError::Cancelled { .. } => TrackingError::Cancelled,
		}
	}
}

impl From<sqlx::Error> for TrackingError {
	fn from(err: sqlx::Error) -> Self {
		TrackingError::Store(err.to_string())
	}
}

/// Result type alias for tracking operations.
pub type Result<T> = std::result::Result<T, TrackingError>;
