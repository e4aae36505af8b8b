// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Runtime configuration.
//!
//! Values come from built-in defaults, optionally overlaid by a
//! [`RuntimeConfigLayer`] (e.g. deserialized from the application's own
//! config file) and by environment variables:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `LOOM_FLAGS_INIT_TIMEOUT_MS` | Fail provider initialization after this long (`0` = never) |
//! | `LOOM_FLAGS_CLOSE_TIMEOUT_MS` | Give up on provider shutdown after this long (`0` = never) |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FlagsError, Result};

pub const ENV_INIT_TIMEOUT_MS: &str = "LOOM_FLAGS_INIT_TIMEOUT_MS";
pub const ENV_CLOSE_TIMEOUT_MS: &str = "LOOM_FLAGS_CLOSE_TIMEOUT_MS";

/// Partially specified configuration; later layers win field by field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfigLayer {
	pub init_timeout_ms: Option<u64>,
	pub close_timeout_ms: Option<u64>,
}

impl RuntimeConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.init_timeout_ms.is_some() {
			self.init_timeout_ms = other.init_timeout_ms;
		}
		if other.close_timeout_ms.is_some() {
			self.close_timeout_ms = other.close_timeout_ms;
		}
	}

	pub fn finalize(self) -> RuntimeConfig {
		RuntimeConfig {
			init_timeout: millis(self.init_timeout_ms),
			close_timeout: millis(self.close_timeout_ms),
		}
	}

	/// Loads the layer from `LOOM_FLAGS_*` environment variables.
	pub fn from_env() -> Result<Self> {
		debug!("loading flags runtime configuration from environment");
		Ok(Self {
			init_timeout_ms: env_u64(ENV_INIT_TIMEOUT_MS)?,
			close_timeout_ms: env_u64(ENV_CLOSE_TIMEOUT_MS)?,
		})
	}
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
	/// Upper bound on a provider's `initialize`; `None` waits forever.
	pub init_timeout: Option<Duration>,
	/// Upper bound on a provider's `on_close`; `None` waits forever.
	pub close_timeout: Option<Duration>,
}

impl RuntimeConfig {
	/// Defaults overlaid with the environment.
	pub fn from_env() -> Result<Self> {
		let mut layer = RuntimeConfigLayer::default();
		layer.merge(RuntimeConfigLayer::from_env()?);
		Ok(layer.finalize())
	}

	pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
		self.init_timeout = Some(timeout);
		self
	}

	pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
		self.close_timeout = Some(timeout);
		self
	}
}

fn millis(value: Option<u64>) -> Option<Duration> {
	value.filter(|ms| *ms > 0).map(Duration::from_millis)
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_u64(name: &str) -> Result<Option<u64>> {
	match env_var(name) {
		Some(v) => v
			.trim()
			.parse()
			.map(Some)
			.map_err(|_| FlagsError::InvalidConfig {
				key: name.to_string(),
				message: format!("invalid u64 value '{v}'"),
			}),
		None => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_has_no_timeouts() {
		let config = RuntimeConfig::default();
		assert_eq!(config.init_timeout, None);
		assert_eq!(config.close_timeout, None);
	}

	#[test]
	fn test_layer_finalize_with_values() {
		let layer = RuntimeConfigLayer {
			init_timeout_ms: Some(1500),
			close_timeout_ms: Some(0),
		};
		let config = layer.finalize();
		assert_eq!(config.init_timeout, Some(Duration::from_millis(1500)));
		assert_eq!(config.close_timeout, None);
	}

	#[test]
	fn test_merge_overwrites_only_set_fields() {
		let mut base = RuntimeConfigLayer {
			init_timeout_ms: Some(1000),
			close_timeout_ms: Some(2000),
		};
		base.merge(RuntimeConfigLayer {
			init_timeout_ms: Some(50),
			close_timeout_ms: None,
		});
		assert_eq!(base.init_timeout_ms, Some(50));
		assert_eq!(base.close_timeout_ms, Some(2000));
	}

	#[test]
	fn test_layer_deserializes_partial_json() {
		let layer: RuntimeConfigLayer =
			serde_json::from_str(r#"{"init_timeout_ms": 300}"#).unwrap();
		assert_eq!(layer.init_timeout_ms, Some(300));
		assert_eq!(layer.close_timeout_ms, None);
	}

	#[test]
	fn test_builder_setters() {
		let config = RuntimeConfig::default()
			.with_init_timeout(Duration::from_secs(5))
			.with_close_timeout(Duration::from_secs(1));
		assert_eq!(config.init_timeout, Some(Duration::from_secs(5)));
		assert_eq!(config.close_timeout, Some(Duration::from_secs(1)));
	}

	// Both env cases live in one test so they cannot race each other.
	#[test]
	fn test_from_env() {
		std::env::set_var(ENV_INIT_TIMEOUT_MS, "750");
		std::env::remove_var(ENV_CLOSE_TIMEOUT_MS);
		let config = RuntimeConfig::from_env().unwrap();
		assert_eq!(config.init_timeout, Some(Duration::from_millis(750)));
		assert_eq!(config.close_timeout, None);

		std::env::set_var(ENV_INIT_TIMEOUT_MS, "soon");
		let err = RuntimeConfig::from_env().unwrap_err();
		assert!(matches!(err, FlagsError::InvalidConfig { ref key, .. } if key == ENV_INIT_TIMEOUT_MS));

		std::env::remove_var(ENV_INIT_TIMEOUT_MS);
	}
}
