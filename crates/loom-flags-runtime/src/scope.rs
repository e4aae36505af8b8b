// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Global and per-client event scopes.

use std::collections::BTreeMap;
use std::sync::Arc;

use loom_flags_runtime_core::EventDetails;
use parking_lot::Mutex;
use tracing::debug;

use crate::events::EventEmitter;
use crate::logging::Logger;

pub type ScopeEmitter = EventEmitter<EventDetails>;

/// The API-level emitter plus one emitter per client name.
///
/// Client scopes are created on first use and never removed. The key `None`
/// is the unnamed default client.
#[derive(Debug)]
pub struct EventScopes {
	global: Arc<ScopeEmitter>,
	clients: Mutex<BTreeMap<Option<String>, Arc<ScopeEmitter>>>,
	logger: Logger,
}

impl EventScopes {
	pub fn new(logger: Logger) -> Self {
		Self {
			global: Arc::new(EventEmitter::with_logger(logger.clone())),
			clients: Mutex::new(BTreeMap::new()),
			logger,
		}
	}

	pub fn global(&self) -> &Arc<ScopeEmitter> {
		&self.global
	}

	/// Returns the scope for `name`, creating it if needed.
	pub fn client(&self, name: Option<&str>) -> Arc<ScopeEmitter> {
		let mut clients = self.clients.lock();
		let key = name.map(str::to_string);
		if let Some(existing) = clients.get(&key) {
			return Arc::clone(existing);
		}
		debug!(client = ?name, "Creating client event scope");
		let emitter = Arc::new(EventEmitter::with_logger(self.logger.clone()));
		clients.insert(key, Arc::clone(&emitter));
		emitter
	}

	/// Returns the scope for `name` only if it already exists.
	pub fn existing(&self, name: Option<&str>) -> Option<Arc<ScopeEmitter>> {
		self.clients
			.lock()
			.get(&name.map(str::to_string))
			.map(Arc::clone)
	}

	/// Snapshot of every client scope, unnamed scope first.
	pub fn all_clients(&self) -> Vec<(Option<String>, Arc<ScopeEmitter>)> {
		self.clients
			.lock()
			.iter()
			.map(|(name, emitter)| (name.clone(), Arc::clone(emitter)))
			.collect()
	}
}
