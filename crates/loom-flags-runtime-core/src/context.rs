// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation context handed to providers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attributes describing the subject of a flag evaluation.
///
/// The runtime only stores and forwards contexts; merging and targeting
/// are the provider's business.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub targeting_key: Option<String>,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub attributes: Map<String, Value>,
}

/// Request-scoped context carried by a transaction context propagator.
pub type TransactionContext = EvaluationContext;

impl EvaluationContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_targeting_key(mut self, key: impl Into<String>) -> Self {
		self.targeting_key = Some(key.into());
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	pub fn attribute(&self, key: &str) -> Option<&Value> {
		self.attributes.get(key)
	}

	/// Returns true if neither a targeting key nor any attribute is set.
	pub fn is_empty(&self) -> bool {
		self.targeting_key.is_none() && self.attributes.is_empty()
	}
}
