// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom feature flags provider runtime.
//!
//! This crate holds the data shared between flag providers and the runtime
//! that manages them (`loom-flags-runtime`): lifecycle event kinds, the
//! details attached to each dispatched event, provider status and metadata,
//! and the evaluation context handed to providers.
//!
//! # Overview
//!
//! - [`ProviderEvent`] is the closed set of lifecycle events
//!   (`Ready`, `Error`, `Stale`, `ConfigurationChanged`)
//! - [`ProviderEventDetails`] is what a provider attaches when it emits
//! - [`EventDetails`] is what application handlers receive, tagged with the
//!   owning client name
//! - [`ProviderStatus`] tracks where a provider is in its lifecycle
//!
//! # Example
//!
//! ```
//! use loom_flags_runtime_core::{EventDetails, ProviderEvent, ProviderEventDetails};
//!
//! let from_provider = ProviderEventDetails::new()
//!     .with_message("cache expired")
//!     .with_metadata("age_secs", serde_json::json!(300));
//!
//! let details = EventDetails::from_provider(&from_provider, "remote", Some("checkout"));
//! assert_eq!(details.client_name.as_deref(), Some("checkout"));
//! assert_eq!(details.message.as_deref(), Some("cache expired"));
//! assert_eq!(ProviderEvent::Stale.to_string(), "PROVIDER_STALE");
//! ```

pub mod context;
pub mod error;
pub mod event;
pub mod status;

pub use context::{EvaluationContext, TransactionContext};
pub use error::{ProviderError, Result};
pub use event::{EventDetails, ProviderEvent, ProviderEventDetails, RESERVED_METADATA_KEYS};
pub use status::{ClientMetadata, ProviderMetadata, ProviderStatus};
