// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The provider capability contract.
//!
//! A provider is whatever actually resolves flag values (remote service,
//! local file, in-memory fixtures). The runtime only cares about its
//! lifecycle: whether it needs initializing, whether it wants to be told
//! about shutdown and context changes, and whether it emits events of its
//! own.
//!
//! # Example
//!
//! ```ignore
//! use loom_flags_runtime::{
//!     FeatureProvider, ProviderCapabilities, ProviderEventEmitter,
//!     EvaluationContext, ProviderError, ProviderMetadata,
//! };
//! use async_trait::async_trait;
//!
//! struct RemoteProvider {
//!     metadata: ProviderMetadata,
//!     events: ProviderEventEmitter,
//! }
//!
//! #[async_trait]
//! impl FeatureProvider for RemoteProvider {
//!     fn metadata(&self) -> &ProviderMetadata {
//!         &self.metadata
//!     }
//!
//!     fn capabilities(&self) -> ProviderCapabilities {
//!         ProviderCapabilities::NONE.with_initialize().with_on_close()
//!     }
//!
//!     async fn initialize(&self, _ctx: &EvaluationContext) -> Result<(), ProviderError> {
//!         // fetch the initial flag set
//!         Ok(())
//!     }
//!
//!     fn events(&self) -> Option<&ProviderEventEmitter> {
//!         Some(&self.events)
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use loom_flags_runtime_core::{EvaluationContext, ProviderError, ProviderMetadata};

use crate::events::ProviderEventEmitter;

/// Which optional lifecycle operations a provider implements.
///
/// Read once when the provider is bound. An operation whose flag is false
/// is never called, and a provider without `initialize` is Ready as soon as
/// it is bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCapabilities {
	pub initialize: bool,
	pub on_close: bool,
	pub context_change: bool,
}

impl ProviderCapabilities {
	pub const NONE: Self = Self {
		initialize: false,
		on_close: false,
		context_change: false,
	};

	pub const ALL: Self = Self {
		initialize: true,
		on_close: true,
		context_change: true,
	};

	pub const fn with_initialize(mut self) -> Self {
		self.initialize = true;
		self
	}

	pub const fn with_on_close(mut self) -> Self {
		self.on_close = true;
		self
	}

	pub const fn with_context_change(mut self) -> Self {
		self.context_change = true;
		self
	}
}

/// A pluggable flag-resolution backend, as seen by the lifecycle runtime.
#[async_trait]
pub trait FeatureProvider: Send + Sync + 'static {
	fn metadata(&self) -> &ProviderMetadata;

	fn capabilities(&self) -> ProviderCapabilities {
		ProviderCapabilities::NONE
	}

	/// Prepares the provider for resolution. Only called when
	/// [`ProviderCapabilities::initialize`] is set.
	async fn initialize(&self, _context: &EvaluationContext) -> Result<(), ProviderError> {
		Ok(())
	}

	/// Releases resources. Best effort; only called when
	/// [`ProviderCapabilities::on_close`] is set.
	async fn on_close(&self) -> Result<(), ProviderError> {
		Ok(())
	}

	/// Called when the global evaluation context changes. Only called when
	/// [`ProviderCapabilities::context_change`] is set.
	async fn on_context_change(
		&self,
		_old: &EvaluationContext,
		_new: &EvaluationContext,
	) -> Result<(), ProviderError> {
		Ok(())
	}

	/// The provider's own event source, if it emits events.
	fn events(&self) -> Option<&ProviderEventEmitter> {
		None
	}
}

/// A provider shared between registry slots.
pub type SharedProvider = Arc<dyn FeatureProvider>;

/// Identity of a provider instance, independent of which slots hold it.
pub(crate) fn provider_key(provider: &SharedProvider) -> usize {
	Arc::as_ptr(provider) as *const () as usize
}

pub(crate) fn same_provider(a: &SharedProvider, b: &SharedProvider) -> bool {
	Arc::ptr_eq(a, b)
}

/// Placeholder bound to the default slot until something else is.
#[derive(Debug)]
pub struct NoopProvider {
	metadata: ProviderMetadata,
}

impl NoopProvider {
	pub const NAME: &'static str = "No-op Provider";

	pub fn new() -> Self {
		Self {
			metadata: ProviderMetadata::new(Self::NAME),
		}
	}
}

impl Default for NoopProvider {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl FeatureProvider for NoopProvider {
	fn metadata(&self) -> &ProviderMetadata {
		&self.metadata
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn capability_builders_set_flags() {
		let caps = ProviderCapabilities::NONE.with_initialize().with_context_change();
		assert!(caps.initialize);
		assert!(!caps.on_close);
		assert!(caps.context_change);
		assert_eq!(ProviderCapabilities::default(), ProviderCapabilities::NONE);
	}

	#[test]
	fn noop_provider_declares_nothing() {
		let provider = NoopProvider::new();
		assert_eq!(provider.metadata().name, NoopProvider::NAME);
		assert_eq!(provider.capabilities(), ProviderCapabilities::NONE);
		assert!(provider.events().is_none());
	}

	#[test]
	fn provider_identity_ignores_equal_contents() {
		let a: SharedProvider = Arc::new(NoopProvider::new());
		let b: SharedProvider = Arc::new(NoopProvider::new());
		let a2 = Arc::clone(&a);

		assert!(same_provider(&a, &a2));
		assert!(!same_provider(&a, &b));
		assert_eq!(provider_key(&a), provider_key(&a2));
		assert_ne!(provider_key(&a), provider_key(&b));
	}
}
