// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provider runtime for Loom feature flags.
//!
//! This crate manages which flag provider serves which client name, drives
//! providers through initialization and shutdown, and delivers their
//! lifecycle events to handlers registered on the API or on a client.
//!
//! # Features
//!
//! - **Named Bindings**: Bind a provider globally or per client name; unbound
//!   names follow the default provider
//! - **Lifecycle Events**: `Ready`, `Error`, `Stale` and `ConfigurationChanged`
//!   delivered per client and globally
//! - **Handler Persistence**: Handlers survive provider swaps, and late
//!   `Ready` handlers still observe readiness
//! - **Failure Isolation**: Panicking handlers and failing providers are
//!   logged, never propagated
//! - **Shared Providers**: A provider bound to several names is initialized
//!   once and closed once, after its last binding goes away
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use loom_flags_runtime::{handler, EventDetails, FlagsApi, ProviderEvent, RuntimeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = FlagsApi::new(RuntimeConfig::from_env()?);
//!
//!     let client = api.client("checkout");
//!     client.add_handler(
//!         ProviderEvent::Ready,
//!         handler(|details: &EventDetails| println!("ready: {}", details.provider_name)),
//!     );
//!
//!     // Wait for the provider to initialize
//!     api.set_provider_for_and_wait("checkout", Arc::new(MyProvider::new())).await?;
//!
//!     // Close every bound provider on shutdown
//!     api.close().await;
//!     Ok(())
//! }
//! ```

mod api;
mod client;
mod config;
mod error;
mod events;
mod hooks;
mod lifecycle;
mod logging;
mod propagator;
mod provider;
mod registry;
mod scope;

pub use api::FlagsApi;
pub use client::FlagsClient;
pub use config::{RuntimeConfig, RuntimeConfigLayer, ENV_CLOSE_TIMEOUT_MS, ENV_INIT_TIMEOUT_MS};
pub use error::{FlagsError, Result};
pub use events::{handler, EventEmitter, EventHandler, ProviderEventEmitter};
pub use hooks::{Hook, HookList, SharedHook};
pub use logging::Logger;
pub use propagator::{
	NoopTransactionContextPropagator, PropagatorError, SharedPropagator,
	TaskLocalTransactionContextPropagator, TransactionContextPropagator,
};
pub use provider::{FeatureProvider, NoopProvider, ProviderCapabilities, SharedProvider};
pub use registry::ProviderRegistry;
pub use scope::{EventScopes, ScopeEmitter};

// Re-export core types for convenience
pub use loom_flags_runtime_core::{
	ClientMetadata, EvaluationContext, EventDetails, ProviderError, ProviderEvent,
	ProviderEventDetails, ProviderMetadata, ProviderStatus, TransactionContext,
};
