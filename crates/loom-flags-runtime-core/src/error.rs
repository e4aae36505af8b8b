// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Errors returned by provider lifecycle operations.

use thiserror::Error;

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Failures a provider reports from its lifecycle operations.
///
/// The runtime never propagates these to application code. They are logged
/// and, for initialization, turned into an `Error` event whose message is
/// the `Display` output of the error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
	/// `initialize` failed; the provider is not usable.
	#[error("provider initialization failed: {0}")]
	Initialization(String),

	/// `on_close` failed.
	#[error("provider shutdown failed: {0}")]
	Shutdown(String),

	/// `on_context_change` failed.
	#[error("provider context change failed: {0}")]
	ContextChange(String),

	/// Any other provider-specific failure.
	#[error("{0}")]
	General(String),
}

impl ProviderError {
	/// Creates a general error from any message.
	pub fn general(message: impl Into<String>) -> Self {
		Self::General(message.into())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn initialization_message_includes_cause() {
		let err = ProviderError::Initialization("boom".to_string());
		assert_eq!(err.to_string(), "provider initialization failed: boom");
	}

	#[test]
	fn general_is_bare_message() {
		assert_eq!(ProviderError::general("offline").to_string(), "offline");
	}
}
