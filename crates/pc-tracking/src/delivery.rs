// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retry controller wrapping the transport.

use std::sync::Arc;

use pc_tracking_core::{DeliveryMode, Event, RetryPolicy};
use pc_tracking_http::RetryConfig;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, TrackingError};
use crate::transport::{DeliveryResponse, Dispatch, Transport};

pub fn retry_config(policy: &RetryPolicy) -> RetryConfig {
	RetryConfig {
		max_retries: policy.limit,
		base_delay: policy.initial_delay(),
		max_delay: policy.max_delay(),
		backoff_factor: policy.backoff_factor,
		retryable_statuses: policy.retry_on_response_statuses.clone(),
	}
}

/// Delivers through the transport with bounded, cancellable retries.
///
/// Observable deliveries are retried while the failure's status is in the
/// retry set and budget remains. Fire-and-forget deliveries are attempted
/// exactly once since their outcome is never seen.
pub struct RetryController {
	transport: Arc<dyn Transport>,
	config: RetryConfig,
	cancel: CancellationToken,
}

impl RetryController {
	pub fn new(transport: Arc<dyn Transport>, policy: &RetryPolicy, cancel: CancellationToken) -> Self {
		Self {
			transport,
			config: retry_config(policy),
			cancel,
		}
	}

	pub async fn send(
		&self,
		events: &[Event],
		dispatch: Dispatch,
		mode: DeliveryMode,
	) -> Result<DeliveryResponse> {
		match mode {
			DeliveryMode::FireAndForget => {
				let result = self.transport.deliver(events, dispatch, mode).await;
				result.map_err(|source| {
					debug!(error = %source, "fire-and-forget delivery could not be started");
					TrackingError::Delivery {
						attempts: 1,
						source,
					}
				})
			}
			DeliveryMode::Observable => {
				pc_tracking_http::retry(&self.config, &self.cancel, || {
					self.transport.deliver(events, dispatch, mode)
				})
				.await
				.map_err(TrackingError::from)
			}
		}
	}
}
