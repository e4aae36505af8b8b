// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Transaction context propagation.
//!
//! A transaction context is request-scoped data carried alongside, not
//! inside, the evaluation context. How it travels with the request is up to
//! the propagator: the default does nothing, and
//! [`TaskLocalTransactionContextPropagator`] stores it in a tokio task-local.

use std::future::Future;
use std::sync::Arc;

use loom_flags_runtime_core::TransactionContext;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PropagatorError {
	#[error("transaction context unavailable: {0}")]
	Unavailable(String),

	#[error("{0}")]
	Other(String),
}

pub trait TransactionContextPropagator: Send + Sync + 'static {
	/// The transaction context in effect for the caller.
	fn get_transaction_context(&self) -> Result<TransactionContext, PropagatorError>;

	/// Runs `f` with `context` in effect. Implementations must call `f`
	/// exactly once.
	fn with_transaction_context(&self, context: TransactionContext, f: &mut dyn FnMut());
}

pub type SharedPropagator = Arc<dyn TransactionContextPropagator>;

/// Ignores the context it is given and always reports an empty one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransactionContextPropagator;

impl TransactionContextPropagator for NoopTransactionContextPropagator {
	fn get_transaction_context(&self) -> Result<TransactionContext, PropagatorError> {
		Ok(TransactionContext::default())
	}

	fn with_transaction_context(&self, _context: TransactionContext, f: &mut dyn FnMut()) {
		f();
	}
}

tokio::task_local! {
	static TRANSACTION_CONTEXT: TransactionContext;
}

/// Keeps the transaction context in a tokio task-local.
///
/// The synchronous [`with_transaction_context`] scope covers code that runs
/// inside the closure without yielding. To carry the context across
/// `.await` points, wrap the future with [`scope`].
///
/// [`with_transaction_context`]: TransactionContextPropagator::with_transaction_context
/// [`scope`]: TaskLocalTransactionContextPropagator::scope
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskLocalTransactionContextPropagator;

impl TaskLocalTransactionContextPropagator {
	pub fn new() -> Self {
		Self
	}

	pub async fn scope<F>(context: TransactionContext, future: F) -> F::Output
	where
		F: Future,
	{
		TRANSACTION_CONTEXT.scope(context, future).await
	}
}

impl TransactionContextPropagator for TaskLocalTransactionContextPropagator {
	fn get_transaction_context(&self) -> Result<TransactionContext, PropagatorError> {
		Ok(TRANSACTION_CONTEXT
			.try_with(Clone::clone)
			.unwrap_or_default())
	}

	fn with_transaction_context(&self, context: TransactionContext, f: &mut dyn FnMut()) {
		TRANSACTION_CONTEXT.sync_scope(context, f);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ctx(key: &str) -> TransactionContext {
		TransactionContext::new().with_targeting_key(key)
	}

	#[test]
	fn noop_reports_empty_context_and_runs_callback() {
		let propagator = NoopTransactionContextPropagator;
		let mut ran = false;
		propagator.with_transaction_context(ctx("user-1"), &mut || ran = true);
		assert!(ran);
		assert!(propagator.get_transaction_context().unwrap().is_empty());
	}

	#[test]
	fn task_local_is_visible_inside_sync_scope_only() {
		let propagator = TaskLocalTransactionContextPropagator::new();
		let mut seen = None;
		propagator.with_transaction_context(ctx("user-1"), &mut || {
			seen = propagator.get_transaction_context().ok();
		});

		assert_eq!(seen, Some(ctx("user-1")));
		assert!(propagator.get_transaction_context().unwrap().is_empty());
	}

	#[tokio::test]
	async fn task_local_scope_spans_await_points() {
		let propagator = TaskLocalTransactionContextPropagator::new();
		let seen = TaskLocalTransactionContextPropagator::scope(ctx("user-2"), async move {
			tokio::task::yield_now().await;
			propagator.get_transaction_context().unwrap()
		})
		.await;

		assert_eq!(seen, ctx("user-2"));
	}
}
