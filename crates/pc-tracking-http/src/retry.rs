// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retry logic with exponential backoff for delivery requests.
//!
//! The retry set is configuration, not a property of the error: an error
//! exposes its status code (if it has one) and whether it is a transient
//! transport failure, and [`RetryConfig`] decides what that means.
//!
//! Backoff sleeps race a [`CancellationToken`]; once the token fires no
//! further attempt is started.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
	/// Additional attempts after the first. `0` means a single attempt.
	pub max_retries: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_retries: 0,
			base_delay: Duration::from_millis(200),
			max_delay: Duration::from_secs(30),
			backoff_factor: 2.0,
			retryable_statuses: vec![408, 500, 502, 503, 504],
		}
	}
}

impl RetryConfig {
	/// Returns true if `err` should consume retry budget.
	pub fn should_retry<E: RetryableError>(&self, err: &E) -> bool {
		match err.status_code() {
			Some(status) => self.retryable_statuses.contains(&status),
			None => err.is_transient(),
		}
	}
}

pub trait RetryableError {
	/// HTTP-like status code of the failed attempt, if one was observed.
	fn status_code(&self) -> Option<u16>;

	/// Connection-level failure with no status (timeout, refused, reset).
	fn is_transient(&self) -> bool {
		false
	}
}

impl RetryableError for reqwest::Error {
	fn status_code(&self) -> Option<u16> {
		self.status().map(|s| s.as_u16())
	}

	fn is_transient(&self) -> bool {
		self.is_timeout() || self.is_connect()
	}
}

/// Terminal outcome of [`retry`].
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
	#[error("not retryable after {attempts} attempt(s): {error}")]
	Rejected { attempts: u32, error: E },

	#[error("retries exhausted after {attempts} attempt(s): {error}")]
	Exhausted { attempts: u32, error: E },

	#[error("cancelled after {attempts} attempt(s)")]
	Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
	pub fn attempts(&self) -> u32 {
		match self {
			RetryError::Rejected { attempts, .. }
			| RetryError::Exhausted { attempts, .. }
			| RetryError::Cancelled { attempts } => *attempts,
		}
	}

	/// The error of the last attempt, unless the loop was cancelled.
	pub fn into_error(self) -> Option<E> {
		match self {
			RetryError::Rejected { error, .. } | RetryError::Exhausted { error, .. } => Some(error),
			RetryError::Cancelled { .. } => None,
		}
	}
}

/// Delay before retry number `retry` (zero-based).
///
/// Monotonically non-decreasing in `retry` and capped at `max_delay`.
pub fn calculate_delay(cfg: &RetryConfig, retry: u32) -> Duration {
	let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
	let exponential_delay = cfg.base_delay.as_secs_f64() * cfg.backoff_factor.powi(exponent);
	let capped_delay = exponential_delay.min(cfg.max_delay.as_secs_f64());
	Duration::from_secs_f64(capped_delay)
}

pub async fn retry<F, Fut, T, E>(
	cfg: &RetryConfig,
	cancel: &CancellationToken,
	mut f: F,
) -> Result<T, RetryError<E>>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, E>>,
	E: RetryableError + std::fmt::Debug,
{
	let mut attempt = 0;

	loop {
		if cancel.is_cancelled() {
			debug!(attempt = attempt, "retry loop cancelled before attempt");
			return Err(RetryError::Cancelled { attempts: attempt });
		}

		match f().await {
			Ok(result) => return Ok(result),
			Err(err) => {
				attempt += 1;

				if !cfg.should_retry(&err) {
					warn!(
						error = ?err,
						attempt = attempt,
						"non-retryable error encountered"
					);
					return Err(RetryError::Rejected {
						attempts: attempt,
						error: err,
					});
				}

				if attempt > cfg.max_retries {
					warn!(
						error = ?err,
						attempt = attempt,
						max_retries = cfg.max_retries,
						"max retry attempts exhausted"
					);
					return Err(RetryError::Exhausted {
						attempts: attempt,
						error: err,
					});
				}

				let delay = calculate_delay(cfg, attempt - 1);
				warn!(
					error = ?err,
					attempt = attempt,
					max_retries = cfg.max_retries,
					delay_ms = delay.as_millis(),
					"retrying after error"
				);

				tokio::select! {
					_ = cancel.cancelled() => {
						debug!(attempt = attempt, "retry backoff cancelled");
						return Err(RetryError::Cancelled { attempts: attempt });
					}
					_ = tokio::time::sleep(delay) => {}
				}
			}
		}
	}
}
