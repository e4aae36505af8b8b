// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the flags runtime.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, FlagsError>;

/// Errors surfaced by the runtime.
///
/// Only [`FlagsApi::set_provider_and_wait`](crate::FlagsApi::set_provider_and_wait)
/// and configuration loading return these; everywhere else provider
/// failures are absorbed into `Error` events and log lines.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlagsError {
	/// The provider's `initialize` returned an error or panicked.
	#[error("provider '{provider}' failed to initialize: {message}")]
	Initialization { provider: String, message: String },

	/// The provider's `initialize` did not settle within the configured timeout.
	#[error("provider '{provider}' did not initialize within {timeout:?}")]
	InitializationTimeout { provider: String, timeout: Duration },

	/// A configuration value could not be parsed.
	#[error("invalid configuration value for {key}: {message}")]
	InvalidConfig { key: String, message: String },
}

impl FlagsError {
	/// Message placed in the details of the `Error` event for this failure.
	pub fn event_message(&self) -> String {
		match self {
			FlagsError::Initialization { message, .. } => message.clone(),
			FlagsError::InitializationTimeout { timeout, .. } => {
				format!("initialization timed out after {}ms", timeout.as_millis())
			}
			FlagsError::InvalidConfig { .. } => self.to_string(),
		}
	}
}
