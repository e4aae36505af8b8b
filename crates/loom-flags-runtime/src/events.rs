// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Ordered, failure-isolated event dispatch.
//!
//! An [`EventEmitter`] keeps, per [`ProviderEvent`] kind, the handlers
//! registered for it in insertion order. The same type backs a provider's
//! own event source ([`ProviderEventEmitter`]) and the API and client
//! scopes the runtime dispatches into.
//!
//! # Dispatch rules
//!
//! - Handlers run synchronously in registration order.
//! - The handler list is snapshotted when `emit` starts. Handlers added or
//!   removed while an emission is running take effect from the next emission.
//! - A panicking handler is logged and skipped; the remaining handlers still
//!   run and `emit` itself never panics.
//! - Handlers that need to do async work should spawn it; the emitter never
//!   awaits.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use loom_flags_runtime_core::{ProviderEvent, ProviderEventDetails};
use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::logging::Logger;

/// A registered event handler. Identity is the `Arc` pointer.
pub type EventHandler<D> = Arc<dyn Fn(&D) + Send + Sync>;

/// Event source a provider exposes for the runtime to subscribe to.
pub type ProviderEventEmitter = EventEmitter<ProviderEventDetails>;

/// Wraps a closure as an [`EventHandler`].
pub fn handler<D, F>(f: F) -> EventHandler<D>
where
	F: Fn(&D) + Send + Sync + 'static,
{
	Arc::new(f)
}

pub struct EventEmitter<D> {
	handlers: RwLock<HashMap<ProviderEvent, Vec<EventHandler<D>>>>,
	logger: Logger,
}

impl<D> EventEmitter<D> {
	pub fn new() -> Self {
		Self::with_logger(Logger::new())
	}

	/// Creates an emitter whose handler failures are reported through `logger`.
	pub fn with_logger(logger: Logger) -> Self {
		Self {
			handlers: RwLock::new(HashMap::new()),
			logger,
		}
	}

	/// Appends `handler` to the list for `kind`. Duplicates are kept.
	pub fn add_handler(&self, kind: ProviderEvent, handler: EventHandler<D>) {
		self.handlers.write().entry(kind).or_default().push(handler);
	}

	/// Removes the first registration of `handler` for `kind`.
	///
	/// Returns true if a registration was removed.
	pub fn remove_handler(&self, kind: ProviderEvent, handler: &EventHandler<D>) -> bool {
		let mut handlers = self.handlers.write();
		let Some(list) = handlers.get_mut(&kind) else {
			return false;
		};
		match list.iter().position(|h| Arc::ptr_eq(h, handler)) {
			Some(index) => {
				list.remove(index);
				true
			}
			None => false,
		}
	}

	/// Returns a snapshot of the handlers for `kind`, in registration order.
	pub fn get_handlers(&self, kind: ProviderEvent) -> Vec<EventHandler<D>> {
		self.handlers.read().get(&kind).cloned().unwrap_or_default()
	}

	pub fn handler_count(&self, kind: ProviderEvent) -> usize {
		self.handlers.read().get(&kind).map_or(0, Vec::len)
	}

	/// Invokes every handler registered for `kind`.
	///
	/// Returns the number of handlers that completed without panicking.
	pub fn emit(&self, kind: ProviderEvent, details: &D) -> usize {
		let snapshot = self.get_handlers(kind);
		if snapshot.is_empty() {
			trace!(event = %kind, "No handlers registered");
			return 0;
		}

		trace!(event = %kind, handlers = snapshot.len(), "Dispatching event");
		snapshot
			.iter()
			.filter(|handler| self.invoke(kind, handler, details))
			.count()
	}

	/// Runs a single handler with panic isolation.
	pub(crate) fn invoke(&self, kind: ProviderEvent, handler: &EventHandler<D>, details: &D) -> bool {
		match catch_unwind(AssertUnwindSafe(|| handler(details))) {
			Ok(()) => true,
			Err(payload) => {
				let message = panic_message(payload.as_ref());
				self.logger.scope(|| {
					warn!(event = %kind, error = %message, "Event handler panicked");
				});
				false
			}
		}
	}
}

impl<D> Default for EventEmitter<D> {
	fn default() -> Self {
		Self::new()
	}
}

impl<D> std::fmt::Debug for EventEmitter<D> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let counts: HashMap<ProviderEvent, usize> = self
			.handlers
			.read()
			.iter()
			.map(|(kind, list)| (*kind, list.len()))
			.collect();
		f.debug_struct("EventEmitter")
			.field("handlers", &counts)
			.finish()
	}
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		(*message).to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"unknown panic".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::logging::test_support::CapturedLogs;
	use parking_lot::Mutex;

	fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> EventHandler<String> {
		let log = Arc::clone(log);
		let label = label.to_string();
		handler(move |details: &String| log.lock().push(format!("{label}:{details}")))
	}

	#[test]
	fn emit_with_no_handlers_is_noop() {
		let emitter: EventEmitter<String> = EventEmitter::new();
		assert_eq!(emitter.emit(ProviderEvent::Ready, &"x".to_string()), 0);
	}

	#[test]
	fn handlers_run_in_registration_order() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let emitter = EventEmitter::new();
		emitter.add_handler(ProviderEvent::Ready, recorder(&log, "a"));
		emitter.add_handler(ProviderEvent::Ready, recorder(&log, "b"));
		emitter.add_handler(ProviderEvent::Ready, recorder(&log, "c"));

		assert_eq!(emitter.emit(ProviderEvent::Ready, &"go".to_string()), 3);
		assert_eq!(*log.lock(), vec!["a:go", "b:go", "c:go"]);
	}

	#[test]
	fn kinds_are_dispatched_independently() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let emitter = EventEmitter::new();
		emitter.add_handler(ProviderEvent::Ready, recorder(&log, "ready"));
		emitter.add_handler(ProviderEvent::Stale, recorder(&log, "stale"));

		emitter.emit(ProviderEvent::Stale, &"1".to_string());
		assert_eq!(*log.lock(), vec!["stale:1"]);
	}

	#[test]
	fn panicking_handler_does_not_stop_dispatch() {
		let logs = CapturedLogs::default();
		let logger = Logger::new();
		logger.set(logs.dispatch());

		let log = Arc::new(Mutex::new(Vec::new()));
		let emitter = EventEmitter::with_logger(logger);
		emitter.add_handler(
			ProviderEvent::Error,
			handler(|_: &String| panic!("handler exploded")),
		);
		emitter.add_handler(ProviderEvent::Error, recorder(&log, "after"));

		assert_eq!(emitter.emit(ProviderEvent::Error, &"e".to_string()), 1);
		assert_eq!(*log.lock(), vec!["after:e"]);
		assert!(logs.contents().contains("handler exploded"));
	}

	#[test]
	fn remove_handler_removes_first_match_only() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let emitter = EventEmitter::new();
		let a = recorder(&log, "a");
		let b = recorder(&log, "b");
		emitter.add_handler(ProviderEvent::Ready, Arc::clone(&a));
		emitter.add_handler(ProviderEvent::Ready, Arc::clone(&b));
		emitter.add_handler(ProviderEvent::Ready, Arc::clone(&a));

		assert!(emitter.remove_handler(ProviderEvent::Ready, &a));
		emitter.emit(ProviderEvent::Ready, &"1".to_string());
		assert_eq!(*log.lock(), vec!["b:1", "a:1"]);
	}

	#[test]
	fn remove_unknown_handler_returns_false() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let emitter: EventEmitter<String> = EventEmitter::new();
		assert!(!emitter.remove_handler(ProviderEvent::Ready, &recorder(&log, "a")));
	}

	#[test]
	fn get_handlers_is_a_snapshot() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let emitter = EventEmitter::new();
		emitter.add_handler(ProviderEvent::Ready, recorder(&log, "a"));

		let snapshot = emitter.get_handlers(ProviderEvent::Ready);
		emitter.add_handler(ProviderEvent::Ready, recorder(&log, "b"));

		assert_eq!(snapshot.len(), 1);
		assert_eq!(emitter.handler_count(ProviderEvent::Ready), 2);
	}

	#[test]
	fn handler_added_during_emit_runs_on_next_emit() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let emitter: Arc<EventEmitter<String>> = Arc::new(EventEmitter::new());

		let late = recorder(&log, "late");
		let weak = Arc::downgrade(&emitter);
		emitter.add_handler(
			ProviderEvent::Ready,
			handler(move |_: &String| {
				if let Some(emitter) = weak.upgrade() {
					emitter.add_handler(ProviderEvent::Ready, Arc::clone(&late));
				}
			}),
		);

		assert_eq!(emitter.emit(ProviderEvent::Ready, &"1".to_string()), 1);
		assert!(log.lock().is_empty());

		emitter.emit(ProviderEvent::Ready, &"2".to_string());
		assert_eq!(*log.lock(), vec!["late:2"]);
	}

	#[test]
	fn handler_removed_during_emit_still_runs_for_that_emit() {
		let log = Arc::new(Mutex::new(Vec::new()));
		let emitter: Arc<EventEmitter<String>> = Arc::new(EventEmitter::new());
		let second = recorder(&log, "second");

		let weak = Arc::downgrade(&emitter);
		let to_remove = Arc::clone(&second);
		emitter.add_handler(
			ProviderEvent::Ready,
			handler(move |_: &String| {
				if let Some(emitter) = weak.upgrade() {
					emitter.remove_handler(ProviderEvent::Ready, &to_remove);
				}
			}),
		);
		emitter.add_handler(ProviderEvent::Ready, second);

		emitter.emit(ProviderEvent::Ready, &"1".to_string());
		emitter.emit(ProviderEvent::Ready, &"2".to_string());
		assert_eq!(*log.lock(), vec!["second:1"]);
	}

	#[test]
	fn panic_message_extracts_strings() {
		let owned: Box<dyn Any + Send> = Box::new("owned".to_string());
		let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
		let other: Box<dyn Any + Send> = Box::new(42_u8);

		assert_eq!(panic_message(owned.as_ref()), "owned");
		assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
		assert_eq!(panic_message(other.as_ref()), "unknown panic");
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use parking_lot::Mutex;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn every_non_panicking_handler_runs_in_order(panics in prop::collection::vec(any::<bool>(), 0..12)) {
			let seen = Arc::new(Mutex::new(Vec::new()));
			let emitter: EventEmitter<()> = EventEmitter::new();

			for (index, should_panic) in panics.iter().copied().enumerate() {
				let seen = Arc::clone(&seen);
				emitter.add_handler(ProviderEvent::Stale, handler(move |_: &()| {
					if should_panic {
						panic!("handler {index} failed");
					}
					seen.lock().push(index);
				}));
			}

			let completed = emitter.emit(ProviderEvent::Stale, &());

			let expected: Vec<usize> = panics
				.iter()
				.enumerate()
				.filter(|(_, p)| !**p)
				.map(|(i, _)| i)
				.collect();
			prop_assert_eq!(completed, expected.len());
			prop_assert_eq!(seen.lock().clone(), expected);
		}
	}
}
