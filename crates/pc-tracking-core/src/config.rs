// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracking configuration with documented defaults and eager validation.
//!
//! Every section carries its defaults through `Default` and `#[serde(default)]`,
//! so a partial TOML file only needs the values it changes. [`TrackingConfig::validate`]
//! rejects out-of-range values instead of clamping them.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::hash::HashingMethod;

/// Complete configuration for a tracker instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
	pub endpoint: EndpointConfig,
	pub queue: QueueConfig,
	pub retry: RetryPolicy,
	/// Record only unique events. When false the dedup cache is bypassed.
	pub unique: bool,
	pub cache: CacheConfig,
	pub request_type: RequestType,
	/// Drop every event without delivering it.
	pub opt_out: bool,
	/// Honour the host's Do-Not-Track signal.
	pub respect_do_not_track: bool,
	/// Do-Not-Track signal reported by the host.
	pub do_not_track: bool,
}

impl Default for TrackingConfig {
	fn default() -> Self {
		Self {
			endpoint: EndpointConfig::default(),
			queue: QueueConfig::default(),
			retry: RetryPolicy::default(),
			unique: true,
			cache: CacheConfig::default(),
			request_type: RequestType::default(),
			opt_out: false,
			respect_do_not_track: false,
			do_not_track: false,
		}
	}
}

impl TrackingConfig {
	/// Validates the pipeline settings.
	///
	/// Endpoint settings are checked separately by the HTTP transport, so a
	/// pipeline driven by a custom transport does not need them.
	pub fn validate(&self) -> Result<()> {
		self.queue.validate()?;
		self.retry.validate()?;
		self.cache.validate()?;
		Ok(())
	}

	/// Returns true when tracking is suppressed by opt-out or Do-Not-Track.
	pub fn tracking_disabled(&self) -> bool {
		self.opt_out || (self.respect_do_not_track && self.do_not_track)
	}
}

/// Collection endpoint location and credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
	/// Base URL, e.g. `https://collect.example.com/3.0`.
	pub base_url: String,
	pub project_id: String,
	pub write_key: Option<String>,
	pub request_timeout_ms: u64,
}

impl Default for EndpointConfig {
	fn default() -> Self {
		Self {
			base_url: String::new(),
			project_id: String::new(),
			write_key: None,
			request_timeout_ms: 10_000,
		}
	}
}

impl EndpointConfig {
	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}

	pub fn validate(&self) -> Result<()> {
		if self.base_url.trim().is_empty() {
			return Err(ConfigError::invalid_value(
				"endpoint.base_url",
				"base_url cannot be empty",
			));
		}
		if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
			return Err(ConfigError::invalid_value(
				"endpoint.base_url",
				"must start with http:// or https://",
			));
		}
		if self.project_id.trim().is_empty() {
			return Err(ConfigError::invalid_value(
				"endpoint.project_id",
				"project_id cannot be empty",
			));
		}
		if self.request_timeout_ms == 0 {
			return Err(ConfigError::invalid_value(
				"endpoint.request_timeout_ms",
				"must be greater than 0",
			));
		}
		Ok(())
	}
}

/// Deferred queue triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
	/// Buffered entries that force a flush.
	pub capacity: usize,
	/// Milliseconds between time-triggered flushes.
	pub interval_ms: u64,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			capacity: 5000,
			interval_ms: 15_000,
		}
	}
}

impl QueueConfig {
	pub fn interval(&self) -> Duration {
		Duration::from_millis(self.interval_ms)
	}

	pub fn validate(&self) -> Result<()> {
		validate_capacity(self.capacity)?;
		validate_interval_ms(self.interval_ms)
	}
}

pub fn validate_capacity(capacity: usize) -> Result<()> {
	if capacity == 0 {
		return Err(ConfigError::invalid_value(
			"queue.capacity",
			"must be greater than 0",
		));
	}
	Ok(())
}

pub fn validate_interval_ms(interval_ms: u64) -> Result<()> {
	if interval_ms == 0 {
		return Err(ConfigError::invalid_value(
			"queue.interval_ms",
			"must be greater than 0",
		));
	}
	Ok(())
}

/// Retry-with-backoff settings for response-observable delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Additional attempts after the first failure. `0` means one attempt only.
	pub limit: u32,
	pub initial_delay_ms: u64,
	pub retry_on_response_statuses: Vec<u16>,
	/// Multiplier applied to the delay after each retry.
	pub backoff_factor: f64,
	/// Upper bound for a single backoff delay.
	pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			limit: 0,
			initial_delay_ms: 200,
			retry_on_response_statuses: vec![408, 500, 502, 503, 504],
			backoff_factor: 2.0,
			max_delay_ms: 30_000,
		}
	}
}

impl RetryPolicy {
	pub fn initial_delay(&self) -> Duration {
		Duration::from_millis(self.initial_delay_ms)
	}

	pub fn max_delay(&self) -> Duration {
		Duration::from_millis(self.max_delay_ms)
	}

	pub fn validate(&self) -> Result<()> {
		if self.initial_delay_ms == 0 {
			return Err(ConfigError::invalid_value(
				"retry.initial_delay_ms",
				"must be greater than 0",
			));
		}

		if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
			return Err(ConfigError::invalid_value(
				"retry.backoff_factor",
				"must be at least 1.0",
			));
		}

		if self.max_delay_ms < self.initial_delay_ms {
			return Err(ConfigError::invalid_value(
				"retry.max_delay_ms",
				"cannot be less than initial_delay_ms",
			));
		}

		if let Some(status) = self
			.retry_on_response_statuses
			.iter()
			.find(|s| !(100..=599).contains(*s))
		{
			return Err(ConfigError::invalid_value(
				"retry.retry_on_response_statuses",
				format!("{status} is not an HTTP status code"),
			));
		}

		Ok(())
	}
}

/// Where dedup cache entries live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStorage {
	#[default]
	Memory,
	/// Durable SQLite file named after `cache.db_name`.
	#[serde(alias = "indexeddb", alias = "persistent")]
	Sqlite,
}

/// Dedup cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
	pub storage: CacheStorage,
	/// Database name; the SQLite file is `<db_dir>/<db_name>.sqlite3`.
	pub db_name: String,
	/// Table holding the entries.
	pub db_collection_name: String,
	/// Key column inside the table.
	pub db_collection_key: String,
	/// Directory for the SQLite file. Defaults to the platform data directory.
	pub db_dir: Option<PathBuf>,
	/// Digest applied to the canonical event string. Unset stores the string itself.
	pub hashing_method: Option<HashingMethod>,
	/// Time-to-live of an entry in milliseconds.
	pub max_age_ms: u64,
	/// Drop the entry again when a delivery fails terminally, so a resubmission
	/// is not suppressed.
	pub release_on_failure: bool,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			storage: CacheStorage::Memory,
			db_name: "pcTracking".to_string(),
			db_collection_name: "events".to_string(),
			db_collection_key: "hash".to_string(),
			db_dir: None,
			hashing_method: None,
			max_age_ms: 60 * 1000,
			release_on_failure: false,
		}
	}
}

impl CacheConfig {
	pub fn max_age(&self) -> Duration {
		Duration::from_millis(self.max_age_ms)
	}

	/// Resolved path of the SQLite database file.
	pub fn db_path(&self) -> PathBuf {
		let dir = self
			.db_dir
			.clone()
			.or_else(|| dirs::data_local_dir().map(|d| d.join("pc-tracking")))
			.unwrap_or_else(|| PathBuf::from("."));
		dir.join(format!("{}.sqlite3", self.db_name))
	}

	pub fn validate(&self) -> Result<()> {
		if self.max_age_ms == 0 {
			return Err(ConfigError::invalid_value(
				"cache.max_age_ms",
				"must be greater than 0",
			));
		}

		if self.storage == CacheStorage::Sqlite {
			validate_file_name("cache.db_name", &self.db_name)?;
			validate_identifier("cache.db_collection_name", &self.db_collection_name)?;
			validate_identifier("cache.db_collection_key", &self.db_collection_key)?;
		}

		Ok(())
	}
}

/// Table and column names are interpolated into SQL, so only plain
/// identifiers are accepted.
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
	let mut chars = value.chars();
	let valid = match chars.next() {
		Some(c) if c.is_ascii_alphabetic() || c == '_' => {
			chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
		}
		_ => false,
	};

	if !valid || value.len() > 64 {
		return Err(ConfigError::invalid_value(
			field,
			format!("'{value}' is not a valid identifier"),
		));
	}
	Ok(())
}

fn validate_file_name(field: &str, value: &str) -> Result<()> {
	if value.is_empty()
		|| value
			.chars()
			.any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
	{
		return Err(ConfigError::invalid_value(
			field,
			format!("'{value}' must be non-empty and contain only [A-Za-z0-9_-]"),
		));
	}
	Ok(())
}

/// Transport requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
	/// Ordinary request whose response can be observed.
	#[default]
	Fetch,
	/// One-way signal; success and failure are never observed.
	#[serde(alias = "beaconapi", alias = "beaconAPI")]
	Beacon,
	/// Accepted for compatibility and normalized by [`resolve_delivery_mode`].
	Jsonp,
}

/// Closed set of delivery capabilities used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
	/// Reports status codes; eligible for retries.
	Observable,
	/// Cannot observe the outcome; never retried.
	FireAndForget,
}

impl DeliveryMode {
	pub fn as_str(&self) -> &'static str {
		match self {
			DeliveryMode::Observable => "observable",
			DeliveryMode::FireAndForget => "fire_and_forget",
		}
	}
}

impl std::fmt::Display for DeliveryMode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Maps the requested transport onto a delivery mode, once, at setup.
///
/// The legacy `jsonp` request type becomes `Observable` when an error handler
/// is supplied and `FireAndForget` otherwise. A beacon transport combined with
/// an error handler is rejected because its failures can never be reported.
pub fn resolve_delivery_mode(
	request_type: RequestType,
	has_error_handler: bool,
) -> Result<DeliveryMode> {
	match (request_type, has_error_handler) {
		(RequestType::Fetch, _) => Ok(DeliveryMode::Observable),
		(RequestType::Beacon, false) => Ok(DeliveryMode::FireAndForget),
		(RequestType::Beacon, true) => Err(ConfigError::Conflict(
			"the beacon transport ignores responses and cannot be combined with an error handler; use request_type = \"fetch\"".to_string(),
		)),
		(RequestType::Jsonp, true) => Ok(DeliveryMode::Observable),
		(RequestType::Jsonp, false) => Ok(DeliveryMode::FireAndForget),
	}
}
