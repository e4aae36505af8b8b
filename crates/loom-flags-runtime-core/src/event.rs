// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provider lifecycle events and the details dispatched with them.
//!
//! # Events
//!
//! - `PROVIDER_READY` - Provider finished initializing and can resolve flags
//! - `PROVIDER_ERROR` - Provider failed to initialize or hit an error later
//! - `PROVIDER_STALE` - Provider is serving cached values that may be outdated
//! - `PROVIDER_CONFIGURATION_CHANGED` - Flag configuration changed upstream

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata keys a provider may not set, since they would shadow the tags
/// the runtime adds to every dispatched event.
pub const RESERVED_METADATA_KEYS: &[&str] =
	&["client_name", "clientName", "provider_name", "providerName"];

/// Lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderEvent {
	#[serde(rename = "PROVIDER_READY")]
	Ready,
	#[serde(rename = "PROVIDER_ERROR")]
	Error,
	#[serde(rename = "PROVIDER_STALE")]
	Stale,
	#[serde(rename = "PROVIDER_CONFIGURATION_CHANGED")]
	ConfigurationChanged,
}

impl ProviderEvent {
	/// Every event kind, in declaration order.
	pub const ALL: [ProviderEvent; 4] = [
		ProviderEvent::Ready,
		ProviderEvent::Error,
		ProviderEvent::Stale,
		ProviderEvent::ConfigurationChanged,
	];

	/// Returns the event type name as a string.
	pub fn as_str(&self) -> &'static str {
		match self {
			ProviderEvent::Ready => "PROVIDER_READY",
			ProviderEvent::Error => "PROVIDER_ERROR",
			ProviderEvent::Stale => "PROVIDER_STALE",
			ProviderEvent::ConfigurationChanged => "PROVIDER_CONFIGURATION_CHANGED",
		}
	}
}

impl std::fmt::Display for ProviderEvent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Details a provider attaches to an event it emits on its own event source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderEventDetails {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	/// Keys of flags whose configuration changed, if known.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub flags_changed: Vec<String>,
	/// Free-form provider fields merged into the dispatched details.
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub metadata: Map<String, Value>,
}

impl ProviderEventDetails {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());
		self
	}

	pub fn with_flags_changed<I, S>(mut self, keys: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.flags_changed = keys.into_iter().map(Into::into).collect();
		self
	}

	pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
		self.metadata.insert(key.into(), value);
		self
	}
}

/// Details delivered to application handlers.
///
/// Built by the runtime from whatever the provider supplied, with the
/// provider name and the owning client name applied last.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDetails {
	/// Client the event belongs to; `None` for the unnamed default client.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_name: Option<String>,
	pub provider_name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub flags_changed: Vec<String>,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub metadata: Map<String, Value>,
}

impl EventDetails {
	/// Creates details carrying only the provider and client tags.
	pub fn new(provider_name: impl Into<String>, client_name: Option<&str>) -> Self {
		Self {
			client_name: client_name.map(str::to_string),
			provider_name: provider_name.into(),
			..Default::default()
		}
	}

	/// Merges provider-supplied details with the runtime's tags.
	///
	/// Reserved metadata keys are dropped so the provider cannot override
	/// `client_name` or `provider_name`.
	pub fn from_provider(
		details: &ProviderEventDetails,
		provider_name: impl Into<String>,
		client_name: Option<&str>,
	) -> Self {
		let metadata = details
			.metadata
			.iter()
			.filter(|(key, _)| !RESERVED_METADATA_KEYS.contains(&key.as_str()))
			.map(|(key, value)| (key.clone(), value.clone()))
			.collect();

		Self {
			message: details.message.clone(),
			flags_changed: details.flags_changed.clone(),
			metadata,
			provider_name: provider_name.into(),
			client_name: client_name.map(str::to_string),
		}
	}

	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());
		self
	}

	/// Returns a copy tagged for a different client scope.
	pub fn for_client(&self, client_name: Option<&str>) -> Self {
		Self {
			client_name: client_name.map(str::to_string),
			..self.clone()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn event_names_match_serde() {
		for event in ProviderEvent::ALL {
			let json = serde_json::to_string(&event).unwrap();
			assert_eq!(json, format!("\"{}\"", event.as_str()));
		}
	}

	#[test]
	fn from_provider_copies_fields() {
		let details = ProviderEventDetails::new()
			.with_message("cache expired")
			.with_flags_changed(["checkout.new_flow"])
			.with_metadata("age_secs", json!(300));

		let merged = EventDetails::from_provider(&details, "remote", Some("x"));

		assert_eq!(merged.client_name.as_deref(), Some("x"));
		assert_eq!(merged.provider_name, "remote");
		assert_eq!(merged.message.as_deref(), Some("cache expired"));
		assert_eq!(merged.flags_changed, vec!["checkout.new_flow".to_string()]);
		assert_eq!(merged.metadata["age_secs"], json!(300));
	}

	#[test]
	fn from_provider_strips_reserved_keys() {
		let details = ProviderEventDetails::new()
			.with_metadata("client_name", json!("spoofed"))
			.with_metadata("clientName", json!("spoofed"))
			.with_metadata("providerName", json!("spoofed"))
			.with_metadata("region", json!("eu"));

		let merged = EventDetails::from_provider(&details, "remote", None);

		assert_eq!(merged.client_name, None);
		assert_eq!(merged.provider_name, "remote");
		assert_eq!(merged.metadata.len(), 1);

		let serialized = serde_json::to_value(&merged).unwrap();
		assert!(serialized.get("client_name").is_none());
		assert_eq!(serialized["metadata"]["region"], json!("eu"));
	}

	#[test]
	fn for_client_retags_only_client() {
		let details = EventDetails::new("remote", None).with_message("ready");
		let tagged = details.for_client(Some("svc"));

		assert_eq!(tagged.client_name.as_deref(), Some("svc"));
		assert_eq!(tagged.message, details.message);
		assert_eq!(tagged.provider_name, details.provider_name);
	}
}
