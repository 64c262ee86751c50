// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delivery of events to the collection endpoint.

use std::collections::BTreeMap;

use async_trait::async_trait;
use pc_tracking_core::{DeliveryMode, EndpointConfig, Event};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, TrackingError, TransportError};

/// What the transport learned about a delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResponse {
	/// `None` in fire-and-forget mode.
	pub status: Option<u16>,
	pub body: Option<Value>,
}

impl DeliveryResponse {
	pub fn observed(status: u16, body: Option<Value>) -> Self {
		Self {
			status: Some(status),
			body,
		}
	}

	pub fn unobserved() -> Self {
		Self {
			status: None,
			body: None,
		}
	}

	pub fn is_observed(&self) -> bool {
		self.status.is_some()
	}
}

/// How a delivery is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
	/// One event recorded on its own.
	Single,
	/// A group of events, possibly of length one (deferred flushes).
	Batch,
}

/// Sends one event or a batch to the collection endpoint.
///
/// In [`DeliveryMode::FireAndForget`] an implementation must return without
/// waiting for (or reporting) the outcome.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn deliver(
		&self,
		events: &[Event],
		dispatch: Dispatch,
		mode: DeliveryMode,
	) -> std::result::Result<DeliveryResponse, TransportError>;
}

/// reqwest-backed transport.
///
/// A [`Dispatch::Single`] event is posted to
/// `{base}/projects/{project}/events/{collection}` with its payload as the
/// body. Batches go to `{base}/projects/{project}/events` as
/// `{"<collection>": [payload, ...]}`, whatever their length.
pub struct HttpTransport {
	http_client: Client,
	base_url: String,
	project_id: String,
	write_key: Option<String>,
}

impl HttpTransport {
	pub fn new(endpoint: &EndpointConfig) -> Result<Self> {
		endpoint.validate()?;

		let http_client = pc_tracking_http::builder()
			.timeout(endpoint.request_timeout())
			.build()
			.map_err(TrackingError::HttpClient)?;

		Ok(Self::with_client(http_client, endpoint))
	}

	/// Uses a caller-built client (custom TLS, proxies).
	pub fn with_client(http_client: Client, endpoint: &EndpointConfig) -> Self {
		Self {
			http_client,
			base_url: endpoint.base_url.trim_end_matches('/').to_string(),
			project_id: endpoint.project_id.clone(),
			write_key: endpoint.write_key.clone(),
		}
	}

	pub fn event_url(&self, collection: &str) -> String {
		format!(
			"{}/projects/{}/events/{}",
			self.base_url, self.project_id, collection
		)
	}

	pub fn batch_url(&self) -> String {
		format!("{}/projects/{}/events", self.base_url, self.project_id)
	}

	fn build_request(&self, events: &[Event], dispatch: Dispatch) -> RequestBuilder {
		let request = match (dispatch, events) {
			(Dispatch::Single, [event]) => self
				.http_client
				.post(self.event_url(&event.collection))
				.json(&event.payload),
			_ => self.http_client.post(self.batch_url()).json(&batch_body(events)),
		};

		match &self.write_key {
			Some(key) => request.header("Authorization", key),
			None => request,
		}
	}
}

/// Groups payloads by collection, keeping per-collection order.
pub fn batch_body(events: &[Event]) -> BTreeMap<&str, Vec<&Value>> {
	let mut body: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
	for event in events {
		body.entry(event.collection.as_str())
			.or_default()
			.push(&event.payload);
	}
	body
}

#[async_trait]
impl Transport for HttpTransport {
	async fn deliver(
		&self,
		events: &[Event],
		dispatch: Dispatch,
		mode: DeliveryMode,
	) -> std::result::Result<DeliveryResponse, TransportError> {
		if events.is_empty() {
			return Ok(DeliveryResponse::unobserved());
		}

		let request = self.build_request(events, dispatch);

		match mode {
			DeliveryMode::Observable => {
				debug!(count = events.len(), "sending events");
				let response = request.send().await?;
				let status = response.status();

				if !status.is_success() {
					return Err(TransportError::Status {
						status: status.as_u16(),
						message: response.text().await.unwrap_or_default(),
					});
				}

				// A success without a JSON body is still a success.
				let body = response.json::<Value>().await.ok();
				Ok(DeliveryResponse::observed(status.as_u16(), body))
			}
			DeliveryMode::FireAndForget => {
				debug!(count = events.len(), "sending events fire-and-forget");
				tokio::spawn(async move {
					match request.send().await {
						Ok(response) => debug!(status = response.status().as_u16(), "unobserved delivery completed"),
						Err(e) => debug!(error = %e, "unobserved delivery dropped"),
					}
				});
				Ok(DeliveryResponse::unobserved())
			}
		}
	}
}
