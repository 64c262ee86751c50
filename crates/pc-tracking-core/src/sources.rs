// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: TOML files and environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, trace};

use crate::config::{CacheStorage, RequestType, TrackingConfig};
use crate::error::{ConfigError, Result};
use crate::hash::HashingMethod;

/// Prefix for environment overrides.
///
/// Convention: `PC_TRACKING_<SECTION>__<FIELD>` (double underscore for nesting).
pub const ENV_PREFIX: &str = "PC_TRACKING_";

impl TrackingConfig {
	/// Parses a TOML document. Missing keys keep their defaults.
	pub fn from_toml_str(content: &str) -> Result<Self> {
		toml::from_str(content).map_err(|e| ConfigError::TomlParse {
			path: PathBuf::from("<inline>"),
			source: e,
		})
	}

	/// Loads a TOML file. A missing file yields the defaults.
	pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		if !path.exists() {
			debug!(path = %path.display(), "config file not found, using defaults");
			return Ok(Self::default());
		}

		debug!(path = %path.display(), "loading config file");
		let content = std::fs::read_to_string(path)?;
		toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: path.to_path_buf(),
			source: e,
		})
	}

	/// Applies overrides from the process environment.
	pub fn apply_process_env(&mut self) -> Result<()> {
		self.apply_env(std::env::vars())
	}

	/// Applies `PC_TRACKING_*` overrides from the given variables.
	///
	/// Unknown keys under the prefix are ignored; known keys with unparsable
	/// values are rejected.
	pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<()>
	where
		I: IntoIterator<Item = (K, V)>,
		K: AsRef<str>,
		V: AsRef<str>,
	{
		for (key, value) in vars {
			let key = key.as_ref();
			let Some(name) = key.strip_prefix(ENV_PREFIX) else {
				continue;
			};

			let value = value.as_ref().trim();
			if value.is_empty() {
				continue;
			}

			trace!(key = %key, "processing env var");

			match name {
				"ENDPOINT__BASE_URL" => self.endpoint.base_url = value.to_string(),
				"ENDPOINT__PROJECT_ID" => self.endpoint.project_id = value.to_string(),
				"ENDPOINT__WRITE_KEY" => self.endpoint.write_key = Some(value.to_string()),
				"ENDPOINT__REQUEST_TIMEOUT_MS" => {
					self.endpoint.request_timeout_ms = parse(key, value)?
				}
				"QUEUE__CAPACITY" => self.queue.capacity = parse(key, value)?,
				"QUEUE__INTERVAL_MS" => self.queue.interval_ms = parse(key, value)?,
				"RETRY__LIMIT" => self.retry.limit = parse(key, value)?,
				"RETRY__INITIAL_DELAY_MS" => self.retry.initial_delay_ms = parse(key, value)?,
				"RETRY__MAX_DELAY_MS" => self.retry.max_delay_ms = parse(key, value)?,
				"RETRY__BACKOFF_FACTOR" => self.retry.backoff_factor = parse(key, value)?,
				"RETRY__RETRY_ON_RESPONSE_STATUSES" => {
					self.retry.retry_on_response_statuses = value
						.split(',')
						.map(|s| parse(key, s.trim()))
						.collect::<Result<Vec<u16>>>()?;
				}
				"UNIQUE" => self.unique = parse_bool(key, value)?,
				"CACHE__STORAGE" => {
					self.cache.storage = match value.to_ascii_lowercase().as_str() {
						"memory" => CacheStorage::Memory,
						"sqlite" | "persistent" | "indexeddb" => CacheStorage::Sqlite,
						_ => return Err(ConfigError::invalid_value(key, "expected memory or sqlite")),
					}
				}
				"CACHE__DB_NAME" => self.cache.db_name = value.to_string(),
				"CACHE__DB_COLLECTION_NAME" => self.cache.db_collection_name = value.to_string(),
				"CACHE__DB_COLLECTION_KEY" => self.cache.db_collection_key = value.to_string(),
				"CACHE__DB_DIR" => self.cache.db_dir = Some(PathBuf::from(value)),
				"CACHE__HASHING_METHOD" => {
					self.cache.hashing_method = match value {
						"none" => None,
						other => Some(
							HashingMethod::from_str(other)
								.map_err(|e| ConfigError::invalid_value(key, e))?,
						),
					}
				}
				"CACHE__MAX_AGE_MS" => self.cache.max_age_ms = parse(key, value)?,
				"CACHE__RELEASE_ON_FAILURE" => {
					self.cache.release_on_failure = parse_bool(key, value)?
				}
				"REQUEST_TYPE" => {
					self.request_type = match value.to_ascii_lowercase().as_str() {
						"fetch" => RequestType::Fetch,
						"beacon" | "beaconapi" => RequestType::Beacon,
						"jsonp" => RequestType::Jsonp,
						_ => {
							return Err(ConfigError::invalid_value(
								key,
								"expected fetch, beacon or jsonp",
							))
						}
					}
				}
				"OPT_OUT" => self.opt_out = parse_bool(key, value)?,
				"RESPECT_DO_NOT_TRACK" => self.respect_do_not_track = parse_bool(key, value)?,
				_ => trace!(key = %key, "ignoring unknown env var"),
			}
		}

		Ok(())
	}
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
	value
		.parse()
		.map_err(|_| ConfigError::invalid_value(key, format!("cannot parse '{value}'")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
	match value.to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		_ => Err(ConfigError::invalid_value(key, format!("'{value}' is not a boolean"))),
	}
}
