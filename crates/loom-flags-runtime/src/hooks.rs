// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation hook registration.
//!
//! The runtime only stores hooks; invoking them belongs to flag evaluation,
//! which lives outside this crate.

use std::sync::Arc;

use parking_lot::RwLock;

pub trait Hook: Send + Sync + 'static {
	fn name(&self) -> &str;
}

pub type SharedHook = Arc<dyn Hook>;

/// Ordered list of hooks, appended to and cleared as a whole.
#[derive(Default)]
pub struct HookList {
	hooks: RwLock<Vec<SharedHook>>,
}

impl HookList {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&self, hooks: impl IntoIterator<Item = SharedHook>) {
		self.hooks.write().extend(hooks);
	}

	pub fn snapshot(&self) -> Vec<SharedHook> {
		self.hooks.read().clone()
	}

	pub fn clear(&self) {
		self.hooks.write().clear();
	}

	pub fn len(&self) -> usize {
		self.hooks.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.hooks.read().is_empty()
	}
}

impl std::fmt::Debug for HookList {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let names: Vec<String> = self.hooks.read().iter().map(|h| h.name().to_string()).collect();
		f.debug_struct("HookList").field("hooks", &names).finish()
	}
}
