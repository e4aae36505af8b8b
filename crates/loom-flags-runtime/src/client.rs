// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client handles.
//!
//! A client is a view onto one name: it resolves to whatever provider serves
//! that name right now and owns the name's event scope. Handlers added here
//! only see events for this name.

use std::sync::Arc;

use loom_flags_runtime_core::{
	ClientMetadata, EvaluationContext, EventDetails, ProviderEvent, ProviderMetadata, ProviderStatus,
};
use parking_lot::RwLock;
use tracing::debug;

use crate::events::EventHandler;
use crate::hooks::{HookList, SharedHook};
use crate::lifecycle::Coordinator;
use crate::provider::SharedProvider;
use crate::scope::ScopeEmitter;

/// Handle for evaluating flags under one client name.
///
/// Cloning is cheap; clones share the context and hooks. Fetching the same
/// name again from [`FlagsApi::client`](crate::FlagsApi::client) gives a
/// handle with its own context and hooks but the same event scope.
#[derive(Clone)]
pub struct FlagsClient {
	name: Option<String>,
	coordinator: Coordinator,
	scope: Arc<ScopeEmitter>,
	context: Arc<RwLock<EvaluationContext>>,
	hooks: Arc<HookList>,
}

impl FlagsClient {
	pub(crate) fn new(name: Option<&str>, coordinator: Coordinator) -> Self {
		let scope = coordinator.scopes.client(name);
		Self {
			name: name.map(str::to_string),
			coordinator,
			scope,
			context: Arc::new(RwLock::new(EvaluationContext::default())),
			hooks: Arc::new(HookList::new()),
		}
	}

	/// The client name; `None` for the default client.
	pub fn name(&self) -> Option<&str> {
		self.name.as_deref()
	}

	pub fn metadata(&self) -> ClientMetadata {
		ClientMetadata {
			name: self.name.clone(),
		}
	}

	/// The provider currently serving this client.
	pub fn provider(&self) -> SharedProvider {
		self.coordinator.registry.provider_for(self.name())
	}

	pub fn provider_metadata(&self) -> ProviderMetadata {
		self.provider().metadata().clone()
	}

	pub fn provider_status(&self) -> ProviderStatus {
		self.coordinator.registry.status_for(self.name())
	}

	/// Adds a handler to this client's scope.
	///
	/// A `Ready` handler is invoked immediately if the serving provider is
	/// already Ready.
	pub fn add_handler(&self, kind: ProviderEvent, handler: EventHandler<EventDetails>) {
		self.scope.add_handler(kind, Arc::clone(&handler));

		if kind == ProviderEvent::Ready && self.provider_status() == ProviderStatus::Ready {
			let provider_name = self.provider_metadata().name;
			debug!(client = ?self.name, provider = %provider_name, "Replaying Ready to late handler");
			let details = EventDetails::new(provider_name, self.name());
			self.scope.invoke(kind, &handler, &details);
		}
	}

	pub fn remove_handler(&self, kind: ProviderEvent, handler: &EventHandler<EventDetails>) -> bool {
		self.scope.remove_handler(kind, handler)
	}

	pub fn get_handlers(&self, kind: ProviderEvent) -> Vec<EventHandler<EventDetails>> {
		self.scope.get_handlers(kind)
	}

	pub fn set_context(&self, context: EvaluationContext) {
		*self.context.write() = context;
	}

	pub fn context(&self) -> EvaluationContext {
		self.context.read().clone()
	}

	pub fn add_hooks(&self, hooks: impl IntoIterator<Item = SharedHook>) {
		self.hooks.add(hooks);
	}

	pub fn hooks(&self) -> Vec<SharedHook> {
		self.hooks.snapshot()
	}

	pub fn clear_hooks(&self) {
		self.hooks.clear();
	}
}

impl std::fmt::Debug for FlagsClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FlagsClient")
			.field("name", &self.name)
			.field("provider_status", &self.provider_status())
			.finish()
	}
}
