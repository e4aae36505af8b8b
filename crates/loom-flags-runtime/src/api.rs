// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The application-facing entry point.
//!
//! [`FlagsApi`] ties the registry, the lifecycle coordinator, and the event
//! scopes together and adds the global context, hooks, logger, and
//! transaction context propagator. Nothing a provider, handler, or
//! propagator does can make a method here fail; those failures are logged
//! and turned into events or safe defaults.

use std::any::Any;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use loom_flags_runtime_core::{
	EvaluationContext, EventDetails, ProviderEvent, ProviderMetadata, ProviderStatus,
	TransactionContext,
};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn, Dispatch};

use crate::client::FlagsClient;
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::events::{panic_message, EventHandler};
use crate::hooks::{HookList, SharedHook};
use crate::lifecycle::{Coordinator, Initialization};
use crate::logging::Logger;
use crate::propagator::{NoopTransactionContextPropagator, SharedPropagator};
use crate::provider::SharedProvider;

static GLOBAL: OnceLock<FlagsApi> = OnceLock::new();

/// Handle to one flags runtime. Clones share all state.
#[derive(Clone)]
pub struct FlagsApi {
	inner: Arc<ApiInner>,
}

struct ApiInner {
	coordinator: Coordinator,
	context: RwLock<EvaluationContext>,
	hooks: HookList,
	propagator: RwLock<SharedPropagator>,
}

impl FlagsApi {
	pub fn new(config: RuntimeConfig) -> Self {
		debug!(
			init_timeout_ms = config.init_timeout.map(|d| d.as_millis() as u64),
			close_timeout_ms = config.close_timeout.map(|d| d.as_millis() as u64),
			"Creating flags runtime"
		);
		Self {
			inner: Arc::new(ApiInner {
				coordinator: Coordinator::new(config, Logger::new()),
				context: RwLock::new(EvaluationContext::default()),
				hooks: HookList::new(),
				propagator: RwLock::new(Arc::new(NoopTransactionContextPropagator)),
			}),
		}
	}

	/// Creates a runtime configured from `LOOM_FLAGS_*` environment variables.
	pub fn from_env() -> Result<Self> {
		Ok(Self::new(RuntimeConfig::from_env()?))
	}

	/// The process-wide runtime, created from the environment on first use.
	///
	/// Invalid environment configuration is logged and the defaults are used.
	pub fn global() -> &'static FlagsApi {
		GLOBAL.get_or_init(|| {
			let config = RuntimeConfig::from_env().unwrap_or_else(|e| {
				warn!(error = %e, "Ignoring invalid flags runtime configuration");
				RuntimeConfig::default()
			});
			Self::new(config)
		})
	}

	pub fn config(&self) -> &RuntimeConfig {
		&self.inner.coordinator.config
	}

	fn coordinator(&self) -> &Coordinator {
		&self.inner.coordinator
	}

	fn logger(&self) -> &Logger {
		&self.inner.coordinator.logger
	}

	// Provider binding

	/// Binds `provider` to the default slot.
	///
	/// Returns once the previous provider has been closed (if nothing else
	/// still uses it). Initialization continues in the background; watch for
	/// `Ready`/`Error`, or use [`set_provider_and_wait`](Self::set_provider_and_wait).
	pub async fn set_provider(&self, provider: SharedProvider) {
		self.bind(None, provider).await;
	}

	/// Binds `provider` to the named slot.
	pub async fn set_provider_for(&self, name: &str, provider: SharedProvider) {
		self.bind(Some(name), provider).await;
	}

	/// Binds `provider` to the default slot and waits for initialization.
	///
	/// The `Error` event is emitted either way; the error is also returned.
	pub async fn set_provider_and_wait(&self, provider: SharedProvider) -> Result<()> {
		self.bind_and_wait(None, provider).await
	}

	pub async fn set_provider_for_and_wait(&self, name: &str, provider: SharedProvider) -> Result<()> {
		self.bind_and_wait(Some(name), provider).await
	}

	async fn bind(&self, name: Option<&str>, provider: SharedProvider) -> Option<Initialization> {
		let context = self.context();
		self.coordinator().bind(name, provider, context).await
	}

	async fn bind_and_wait(&self, name: Option<&str>, provider: SharedProvider) -> Result<()> {
		let provider_name = provider.metadata().name.clone();
		match self.bind(name, Arc::clone(&provider)).await {
			Some(initialization) => initialization.wait(&provider_name).await,
			// Already bound: wait for whatever the earlier bind started.
			None => match self.coordinator().registry.record_for(&provider) {
				Some(record) => record.settled(&provider_name).await,
				None => Ok(()),
			},
		}
	}

	/// The provider bound to the default slot.
	pub fn provider(&self) -> SharedProvider {
		self.coordinator().registry.provider_for(None)
	}

	/// The provider serving `name`: its own binding, else the default.
	pub fn provider_for(&self, name: &str) -> SharedProvider {
		self.coordinator().registry.provider_for(Some(name))
	}

	pub fn provider_metadata(&self, name: Option<&str>) -> ProviderMetadata {
		self.coordinator().registry.provider_for(name).metadata().clone()
	}

	pub fn provider_status(&self, name: Option<&str>) -> ProviderStatus {
		self.coordinator().registry.status_for(name)
	}

	// Clients

	pub fn client(&self, name: &str) -> FlagsClient {
		FlagsClient::new(Some(name), self.coordinator().clone())
	}

	pub fn default_client(&self) -> FlagsClient {
		FlagsClient::new(None, self.coordinator().clone())
	}

	// Global handlers

	/// Adds a handler to the global scope, which sees events for every slot.
	///
	/// A `Ready` handler is invoked once for each slot whose provider is
	/// already Ready.
	pub fn add_handler(&self, kind: ProviderEvent, handler: EventHandler<EventDetails>) {
		let global = self.coordinator().scopes.global();
		global.add_handler(kind, Arc::clone(&handler));

		if kind != ProviderEvent::Ready {
			return;
		}
		for (slot, provider) in self.coordinator().registry.ready_slots() {
			debug!(client = ?slot, provider = %provider.metadata().name, "Replaying Ready to late global handler");
			let details = EventDetails::new(provider.metadata().name.clone(), slot.as_deref());
			global.invoke(kind, &handler, &details);
		}
	}

	pub fn remove_handler(&self, kind: ProviderEvent, handler: &EventHandler<EventDetails>) -> bool {
		self.coordinator().scopes.global().remove_handler(kind, handler)
	}

	pub fn get_handlers(&self, kind: ProviderEvent) -> Vec<EventHandler<EventDetails>> {
		self.coordinator().scopes.global().get_handlers(kind)
	}

	// Evaluation context

	/// Replaces the global evaluation context and tells the default provider.
	pub async fn set_context(&self, context: EvaluationContext) {
		let old = std::mem::replace(&mut *self.inner.context.write(), context.clone());

		let provider = self.provider();
		if !provider.capabilities().context_change {
			return;
		}

		let provider_name = provider.metadata().name.clone();
		debug!(provider = %provider_name, "Notifying provider of context change");
		let outcome = AssertUnwindSafe(provider.on_context_change(&old, &context))
			.catch_unwind()
			.await;
		match outcome {
			Ok(Ok(())) => {}
			Ok(Err(e)) => self.logger().scope(|| {
				error!(provider = %provider_name, error = %e, "Provider context change failed");
			}),
			Err(payload) => {
				let message = panic_message(payload.as_ref());
				self.logger().scope(|| {
					error!(provider = %provider_name, error = %message, "Provider context change panicked");
				});
			}
		}
	}

	pub fn context(&self) -> EvaluationContext {
		self.inner.context.read().clone()
	}

	// Hooks

	pub fn add_hooks(&self, hooks: impl IntoIterator<Item = SharedHook>) {
		self.inner.hooks.add(hooks);
	}

	pub fn hooks(&self) -> Vec<SharedHook> {
		self.inner.hooks.snapshot()
	}

	pub fn clear_hooks(&self) {
		self.inner.hooks.clear();
	}

	// Logging

	/// Routes the runtime's absorbed-failure diagnostics to `dispatch`.
	pub fn set_logger(&self, dispatch: Dispatch) {
		self.logger().set(dispatch);
		info!("Flags runtime logger assigned");
	}

	/// Sends diagnostics back to the process-global subscriber.
	pub fn clear_logger(&self) {
		self.logger().clear();
	}

	// Transaction context

	pub fn set_transaction_context_propagator(&self, propagator: SharedPropagator) {
		*self.inner.propagator.write() = propagator;
		debug!("Transaction context propagator replaced");
	}

	pub fn transaction_context_propagator(&self) -> SharedPropagator {
		Arc::clone(&self.inner.propagator.read())
	}

	/// Runs `f` with `context` as the transaction context.
	///
	/// If the propagator panics or never calls back, `f` is run directly so
	/// the caller still gets a result. A panic raised by `f` itself is passed
	/// on to the caller unchanged.
	pub fn set_transaction_context<R>(&self, context: TransactionContext, f: impl FnOnce() -> R) -> R {
		let propagator = self.transaction_context_propagator();
		let mut callback = Some(f);
		let mut outcome = None;

		// `f` runs under its own catch_unwind so the propagator never sees
		// its panic, and taking it and recording the outcome cannot be split.
		let propagated = catch_unwind(AssertUnwindSafe(|| {
			propagator.with_transaction_context(context, &mut || {
				if let Some(f) = callback.take() {
					outcome = Some(catch_unwind(AssertUnwindSafe(f)));
				}
			});
		}));
		if let Err(payload) = propagated {
			let message = panic_message(payload.as_ref());
			self.logger().scope(|| {
				error!(error = %message, "Transaction context propagator panicked");
			});
		}

		let outcome = match (outcome, callback) {
			(Some(outcome), _) => outcome,
			(None, Some(f)) => {
				self.logger().scope(|| {
					warn!("Transaction context propagator did not run the callback; running it without context");
				});
				return f();
			}
			(None, None) => {
				self.logger().scope(|| {
					error!("Transaction context callback was taken but did not complete");
				});
				Err(Box::new("transaction context callback did not complete") as Box<dyn Any + Send>)
			}
		};

		match outcome {
			Ok(value) => value,
			Err(payload) => resume_unwind(payload),
		}
	}

	/// The current transaction context, or an empty one if the propagator
	/// fails.
	pub fn transaction_context(&self) -> TransactionContext {
		let propagator = self.transaction_context_propagator();
		match catch_unwind(AssertUnwindSafe(|| propagator.get_transaction_context())) {
			Ok(Ok(context)) => context,
			Ok(Err(e)) => {
				self.logger().scope(|| {
					error!(error = %e, "Failed to get transaction context");
				});
				TransactionContext::default()
			}
			Err(payload) => {
				let message = panic_message(payload.as_ref());
				self.logger().scope(|| {
					error!(error = %message, "Transaction context propagator panicked");
				});
				TransactionContext::default()
			}
		}
	}

	// Shutdown

	/// Closes every distinct bound provider. Failures are logged.
	pub async fn close(&self) {
		self.coordinator().close_all().await;
	}
}

impl Default for FlagsApi {
	fn default() -> Self {
		Self::new(RuntimeConfig::default())
	}
}

impl std::fmt::Debug for FlagsApi {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FlagsApi")
			.field("config", self.config())
			.field("logger", self.logger())
			.finish()
	}
}
