// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Drives bound providers to readiness and keeps their events flowing into
//! the right scopes.
//!
//! Binding a provider to a slot:
//!
//! 1. The registry swap cancels the previous provider's forwarding
//!    subscription and installs one on the new provider, atomically with the
//!    map update.
//! 2. A provider that declares `initialize` is initialized in a spawned task
//!    with the current evaluation context; success emits `Ready`, failure
//!    emits `Error` with a message. A provider without `initialize` is Ready
//!    immediately.
//! 3. The previous provider is closed unless another slot still holds it.
//!
//! Events for a named slot go to that client's scope. Events for the default
//! slot go to the unnamed client scope and to every named client scope that
//! has no binding of its own. Every event also goes to the global scope,
//! tagged with the slot's name.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use loom_flags_runtime_core::{
	EvaluationContext, EventDetails, ProviderEvent, ProviderEventDetails, ProviderStatus,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::RuntimeConfig;
use crate::error::{FlagsError, Result};
use crate::events::{panic_message, EventHandler};
use crate::logging::Logger;
use crate::provider::SharedProvider;
use crate::registry::{ProviderRecord, ProviderRegistry};
use crate::scope::{EventScopes, ScopeEmitter};

/// Forwarding handlers installed on a provider's own event source.
pub(crate) struct Subscription {
	provider: SharedProvider,
	handlers: Vec<(ProviderEvent, EventHandler<ProviderEventDetails>)>,
}

impl Subscription {
	pub(crate) fn cancel(self) {
		let Some(events) = self.provider.events() else {
			return;
		};
		for (kind, handler) in &self.handlers {
			events.remove_handler(*kind, handler);
		}
		debug!(
			provider = %self.provider.metadata().name,
			handlers = self.handlers.len(),
			"Provider event subscription cancelled"
		);
	}
}

/// How a bind reaches its first Ready/Error.
pub(crate) enum Initialization {
	/// The provider had no `initialize`; Ready was emitted during the bind.
	Immediate,
	/// Initialization is running in a background task.
	Spawned(JoinHandle<Result<()>>),
}

impl Initialization {
	pub(crate) async fn wait(self, provider: &str) -> Result<()> {
		match self {
			Initialization::Immediate => Ok(()),
			Initialization::Spawned(handle) => handle.await.unwrap_or_else(|e| {
				Err(FlagsError::Initialization {
					provider: provider.to_string(),
					message: e.to_string(),
				})
			}),
		}
	}
}

#[derive(Clone)]
pub(crate) struct Coordinator {
	pub(crate) registry: Arc<ProviderRegistry>,
	pub(crate) scopes: Arc<EventScopes>,
	pub(crate) logger: Logger,
	pub(crate) config: RuntimeConfig,
}

impl Coordinator {
	pub(crate) fn new(config: RuntimeConfig, logger: Logger) -> Self {
		Self {
			registry: Arc::new(ProviderRegistry::new()),
			scopes: Arc::new(EventScopes::new(logger.clone())),
			logger,
			config,
		}
	}

	/// Binds `provider` to the slot for `name`.
	///
	/// Returns `None` if the slot already held this instance.
	pub(crate) async fn bind(
		&self,
		name: Option<&str>,
		provider: SharedProvider,
		context: EvaluationContext,
	) -> Option<Initialization> {
		if name.is_some() {
			self.scopes.client(name);
		}

		let provider_name = provider.metadata().name.clone();
		let capabilities = provider.capabilities();

		let Some(swap) = self.registry.swap(name, Arc::clone(&provider), |generation, record| {
			self.subscribe(name, &provider, generation, record)
		}) else {
			debug!(client = ?name, provider = %provider_name, "Provider already bound; ignoring");
			return None;
		};

		info!(client = ?name, provider = %provider_name, "Provider bound");

		let initialization = if capabilities.initialize {
			let coordinator = self.clone();
			let name = name.map(str::to_string);
			let record = Arc::clone(&swap.record);
			let generation = swap.generation;
			Initialization::Spawned(tokio::spawn(async move {
				coordinator
					.initialize(name, provider, record, generation, context)
					.await
			}))
		} else {
			let recovered = swap.record.status() == ProviderStatus::Error;
			swap.record.set_status(ProviderStatus::Ready);
			info!(client = ?name, provider = %provider_name, "Provider ready");
			self.emit(name, ProviderEvent::Ready, &EventDetails::new(&provider_name, None));
			if recovered {
				self.announce_recovery(name, &provider);
			}
			Initialization::Immediate
		};

		// Handlers run by the emit above may have rebound the old provider,
		// so whether it is still in use is decided only now.
		if let Some(previous) = swap.previous {
			if self.registry.release(&previous) {
				close_provider(&previous, self.config.close_timeout, &self.logger).await;
			}
		}

		Some(initialization)
	}

	async fn initialize(
		self,
		name: Option<String>,
		provider: SharedProvider,
		record: Arc<ProviderRecord>,
		generation: u64,
		context: EvaluationContext,
	) -> Result<()> {
		let provider_name = provider.metadata().name.clone();
		let timeout = self.config.init_timeout;

		let outcome = record
			.initialize_once(|| initialize_provider(&provider, &context, timeout))
			.await;

		let recovered = record.status() == ProviderStatus::Error;
		match &outcome {
			Ok(()) => record.set_status(ProviderStatus::Ready),
			Err(e) => record.fail(e.clone()),
		}
		if outcome.is_ok() && recovered {
			self.announce_recovery(name.as_deref(), &provider);
		}

		if !self.registry.is_current(name.as_deref(), generation) {
			warn!(
				client = ?name,
				provider = %provider_name,
				"Initialization finished after the slot was rebound; not emitting"
			);
			return outcome;
		}

		match &outcome {
			Ok(()) => {
				info!(client = ?name, provider = %provider_name, "Provider ready");
				self.emit(
					name.as_deref(),
					ProviderEvent::Ready,
					&EventDetails::new(&provider_name, None),
				);
			}
			Err(e) => {
				self.logger.scope(|| {
					error!(client = ?name, provider = %provider_name, error = %e, "Provider initialization failed");
				});
				self.emit(
					name.as_deref(),
					ProviderEvent::Error,
					&EventDetails::new(&provider_name, None).with_message(e.event_message()),
				);
			}
		}

		outcome
	}

	/// Emits `Ready` to every other slot holding `provider`, which shared
	/// its `Error` status until now.
	fn announce_recovery(&self, name: Option<&str>, provider: &SharedProvider) {
		let provider_name = &provider.metadata().name;
		for slot in self.registry.names_holding(provider) {
			if slot.as_deref() == name {
				continue;
			}
			info!(client = ?slot, provider = %provider_name, "Provider recovered");
			self.emit(
				slot.as_deref(),
				ProviderEvent::Ready,
				&EventDetails::new(provider_name.as_str(), None),
			);
		}
	}

	/// Installs forwarding handlers for every event kind on the provider's
	/// event source. Called with the registry lock held.
	fn subscribe(
		&self,
		name: Option<&str>,
		provider: &SharedProvider,
		generation: u64,
		record: &Arc<ProviderRecord>,
	) -> Option<Subscription> {
		let events = provider.events()?;
		let provider_name = provider.metadata().name.clone();

		let handlers = ProviderEvent::ALL
			.iter()
			.map(|&kind| {
				let forward = Forwarder {
					registry: Arc::downgrade(&self.registry),
					scopes: Arc::clone(&self.scopes),
					record: Arc::clone(record),
					slot: name.map(str::to_string),
					provider_name: provider_name.clone(),
					generation,
				};
				let handler: EventHandler<ProviderEventDetails> =
					Arc::new(move |details: &ProviderEventDetails| forward.forward(kind, details));
				events.add_handler(kind, Arc::clone(&handler));
				(kind, handler)
			})
			.collect();

		debug!(client = ?name, provider = %provider_name, "Subscribed to provider events");
		Some(Subscription {
			provider: Arc::clone(provider),
			handlers,
		})
	}

	pub(crate) fn emit(&self, slot: Option<&str>, kind: ProviderEvent, details: &EventDetails) {
		dispatch(&self.registry, &self.scopes, slot, kind, details);
	}

	/// Closes every distinct bound provider concurrently.
	pub(crate) async fn close_all(&self) {
		let providers = self.registry.distinct_providers();
		info!(providers = providers.len(), "Closing all providers");
		let closes = providers
			.iter()
			.map(|provider| close_provider(provider, self.config.close_timeout, &self.logger));
		futures::future::join_all(closes).await;
	}
}

/// State captured by one forwarding handler.
struct Forwarder {
	registry: Weak<ProviderRegistry>,
	scopes: Arc<EventScopes>,
	record: Arc<ProviderRecord>,
	slot: Option<String>,
	provider_name: String,
	generation: u64,
}

impl Forwarder {
	fn forward(&self, kind: ProviderEvent, details: &ProviderEventDetails) {
		let Some(registry) = self.registry.upgrade() else {
			return;
		};
		// An emission already in flight when the slot was rebound.
		if !registry.is_current(self.slot.as_deref(), self.generation) {
			trace!(client = ?self.slot, provider = %self.provider_name, event = %kind, "Dropping event from superseded provider");
			return;
		}

		match kind {
			ProviderEvent::Ready => self.record.set_status(ProviderStatus::Ready),
			ProviderEvent::Error => self.record.set_status(ProviderStatus::Error),
			ProviderEvent::Stale | ProviderEvent::ConfigurationChanged => {}
		}

		let details = EventDetails::from_provider(details, &self.provider_name, None);
		dispatch(&registry, &self.scopes, self.slot.as_deref(), kind, &details);
	}
}

/// Emits into the client scopes served by `slot` and into the global scope.
fn dispatch(
	registry: &ProviderRegistry,
	scopes: &EventScopes,
	slot: Option<&str>,
	kind: ProviderEvent,
	details: &EventDetails,
) {
	let targets: Vec<(Option<String>, Arc<ScopeEmitter>)> = match slot {
		Some(name) => scopes
			.existing(Some(name))
			.map(|emitter| (Some(name.to_string()), emitter))
			.into_iter()
			.collect(),
		None => {
			let bound = registry.bound_names();
			scopes
				.all_clients()
				.into_iter()
				.filter(|(scope, _)| scope.as_ref().map_or(true, |n| !bound.contains(n)))
				.collect()
		}
	};

	debug!(client = ?slot, event = %kind, scopes = targets.len(), "Dispatching provider event");
	for (scope, emitter) in targets {
		emitter.emit(kind, &details.for_client(scope.as_deref()));
	}
	scopes.global().emit(kind, &details.for_client(slot));
}

async fn initialize_provider(
	provider: &SharedProvider,
	context: &EvaluationContext,
	timeout: Option<Duration>,
) -> Result<()> {
	let provider_name = provider.metadata().name.clone();
	debug!(provider = %provider_name, "Initializing provider");

	let init = AssertUnwindSafe(provider.initialize(context)).catch_unwind();
	let result = match timeout {
		Some(timeout) => tokio::time::timeout(timeout, init).await.map_err(|_| {
			FlagsError::InitializationTimeout {
				provider: provider_name.clone(),
				timeout,
			}
		})?,
		None => init.await,
	};

	match result {
		Ok(Ok(())) => Ok(()),
		Ok(Err(e)) => Err(FlagsError::Initialization {
			provider: provider_name,
			message: e.to_string(),
		}),
		Err(payload) => Err(FlagsError::Initialization {
			provider: provider_name,
			message: format!("initialize panicked: {}", panic_message(payload.as_ref())),
		}),
	}
}

/// Calls `on_close`, logging rather than returning any failure.
pub(crate) async fn close_provider(
	provider: &SharedProvider,
	timeout: Option<Duration>,
	logger: &Logger,
) {
	let provider_name = provider.metadata().name.clone();
	if !provider.capabilities().on_close {
		debug!(provider = %provider_name, "Provider has no on_close; skipping");
		return;
	}

	let close = AssertUnwindSafe(provider.on_close()).catch_unwind();
	let result = match timeout {
		Some(timeout) => match tokio::time::timeout(timeout, close).await {
			Ok(result) => result,
			Err(_) => {
				logger.scope(|| {
					error!(provider = %provider_name, timeout_ms = timeout.as_millis() as u64, "Provider shutdown timed out");
				});
				return;
			}
		},
		None => close.await,
	};

	match result {
		Ok(Ok(())) => info!(provider = %provider_name, "Provider closed"),
		Ok(Err(e)) => logger.scope(|| {
			error!(provider = %provider_name, error = %e, "Provider shutdown failed");
		}),
		Err(payload) => {
			let message = panic_message(payload.as_ref());
			logger.scope(|| {
				error!(provider = %provider_name, error = %message, "Provider shutdown panicked");
			});
		}
	}
}
