// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

/// Where a provider is in its lifecycle.
///
/// `NotReady` covers both "never initialized" and "initialization in
/// flight". `Error` is not terminal: a later `Ready` (from the provider or
/// from a successful rebind) moves it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
	#[default]
	NotReady,
	Ready,
	Error,
}

impl std::fmt::Display for ProviderStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ProviderStatus::NotReady => write!(f, "not_ready"),
			ProviderStatus::Ready => write!(f, "ready"),
			ProviderStatus::Error => write!(f, "error"),
		}
	}
}

/// Identifies a provider in logs and event details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
	pub name: String,
}

impl ProviderMetadata {
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into() }
	}
}

/// Identifies a client handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
	/// `None` for the unnamed default client.
	pub name: Option<String>,
}
