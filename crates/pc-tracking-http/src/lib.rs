// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for pc-tracking.
//!
//! This crate provides:
//! - A pre-configured HTTP client builder with a consistent User-Agent header
//! - Retry logic with exponential backoff that can be cancelled on teardown

mod client;
mod retry;

pub use client::{builder, new_client_with_timeout, user_agent};
pub use retry::{calculate_delay, retry, RetryConfig, RetryError, RetryableError};
