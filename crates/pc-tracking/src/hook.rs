// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error reporting hook for hosts that want callbacks instead of results.
//!
//! The pipeline itself only returns [`Result`](crate::Result)s. A [`Tracker`](crate::Tracker)
//! built with an [`ErrorHook`] additionally forwards every terminal error to
//! the hook, including failures of background flushes that have no caller
//! to return to.
//!
//! Registering a hook requires an observable delivery mode: a tracker
//! configured for the beacon transport refuses to build with a hook.
//!
//! # Example
//!
//! ```ignore
//! use pc_tracking::{ErrorHook, Tracker, TrackingError};
//! use async_trait::async_trait;
//!
//! struct LogHook;
//!
//! #[async_trait]
//! impl ErrorHook for LogHook {
//!     async fn on_error(&self, error: &TrackingError) {
//!         eprintln!("tracking failed: {error}");
//!     }
//! }
//!
//! let tracker = Tracker::builder()
//!     .endpoint("https://collect.example.com/3.0", "proj_1")
//!     .error_hook(LogHook)
//!     .build()
//!     .await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TrackingError;

/// Receives terminal tracking errors.
///
/// Called on the recording path; keep implementations fast.
#[async_trait]
pub trait ErrorHook: Send + Sync + 'static {
	async fn on_error(&self, error: &TrackingError);
}

pub type SharedErrorHook = Arc<dyn ErrorHook>;

/// Discards every error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpErrorHook;

#[async_trait]
impl ErrorHook for NoOpErrorHook {
	async fn on_error(&self, _error: &TrackingError) {}
}
