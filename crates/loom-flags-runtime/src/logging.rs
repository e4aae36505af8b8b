// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Assignable logger for absorbed failures.
//!
//! Provider, handler, and propagator failures never reach the caller; they
//! are logged instead. An application can route those diagnostics to its
//! own subscriber with [`FlagsApi::set_logger`](crate::FlagsApi::set_logger).
//! Until then they go to whatever global subscriber is installed.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Dispatch;

/// Shared, swappable tracing dispatcher.
#[derive(Clone, Default)]
pub struct Logger {
	dispatch: Arc<RwLock<Option<Dispatch>>>,
}

impl Logger {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set(&self, dispatch: Dispatch) {
		*self.dispatch.write() = Some(dispatch);
	}

	pub fn clear(&self) {
		*self.dispatch.write() = None;
	}

	pub fn is_set(&self) -> bool {
		self.dispatch.read().is_some()
	}

	/// Runs `f` with the assigned dispatcher as the thread's default.
	pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
		let dispatch = self.dispatch.read().clone();
		match dispatch {
			Some(dispatch) => tracing::dispatcher::with_default(&dispatch, f),
			None => f(),
		}
	}
}

impl std::fmt::Debug for Logger {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Logger")
			.field("assigned", &self.is_set())
			.finish()
	}
}


#[cfg(test)]
mod tests {
	use super::test_support::CapturedLogs;
	use super::*;

	#[test]
	fn scope_routes_to_assigned_dispatch() {
		let logs = CapturedLogs::default();
		let logger = Logger::new();
		logger.set(logs.dispatch());

		logger.scope(|| tracing::error!(provider = "remote", "shutdown failed"));

		let output = logs.contents();
		assert!(output.contains("shutdown failed"));
		assert!(output.contains("remote"));
	}

	#[test]
	fn cleared_logger_stops_routing() {
		let logs = CapturedLogs::default();
		let logger = Logger::new();
		logger.set(logs.dispatch());
		logger.clear();

		assert!(!logger.is_set());
		logger.scope(|| tracing::error!("not captured"));
		assert!(logs.contents().is_empty());
	}

	#[test]
	fn clones_share_assignment() {
		let logger = Logger::new();
		let clone = logger.clone();
		logger.set(CapturedLogs::default().dispatch());
		assert!(clone.is_set());
	}

	#[test]
	fn scope_returns_closure_value() {
		assert_eq!(Logger::new().scope(|| 7), 7);
	}
}
