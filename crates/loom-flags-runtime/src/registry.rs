// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Mapping from client name to the provider currently serving it.
//!
//! The registry has one default slot, which always holds a provider, and
//! named slots that exist only once something has been bound to them.
//! Unbound names resolve to whatever the default slot holds at lookup time.
//!
//! A provider may sit in several slots at once. Alongside the slots the
//! registry keeps one [`ProviderRecord`] per distinct provider instance
//! (keyed by pointer identity) holding its status and its at-most-once
//! initialization cell. A record lives until [`ProviderRegistry::release`]
//! finds, by scanning every slot under the registry lock, that nothing
//! references its provider any more.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use loom_flags_runtime_core::ProviderStatus;
use parking_lot::Mutex;
use tokio::sync::{watch, OnceCell};
use tracing::debug;

use crate::error::FlagsError;
use crate::lifecycle::Subscription;
use crate::provider::{provider_key, same_provider, NoopProvider, SharedProvider};

/// Lifecycle state shared by every slot holding the same provider.
///
/// Status belongs to the provider instance, not to a slot. When a provider
/// that failed to initialize for one slot later succeeds for another, the
/// coordinator emits `Ready` to every slot holding it.
#[derive(Debug)]
pub(crate) struct ProviderRecord {
	status: watch::Sender<ProviderStatus>,
	error: Mutex<Option<FlagsError>>,
	initialized: OnceCell<()>,
}

impl ProviderRecord {
	fn with_status(status: ProviderStatus) -> Self {
		let (status, _) = watch::channel(status);
		Self {
			status,
			error: Mutex::new(None),
			initialized: OnceCell::new(),
		}
	}

	pub(crate) fn status(&self) -> ProviderStatus {
		*self.status.borrow()
	}

	/// Sets the status and forgets any stored initialization error.
	pub(crate) fn set_status(&self, status: ProviderStatus) {
		*self.error.lock() = None;
		self.status.send_replace(status);
	}

	/// Records a failed initialization and moves to `Error`.
	pub(crate) fn fail(&self, error: FlagsError) {
		*self.error.lock() = Some(error);
		self.status.send_replace(ProviderStatus::Error);
	}

	/// Waits until the provider leaves `NotReady`, then reports the outcome.
	pub(crate) async fn settled(&self, provider: &str) -> Result<(), FlagsError> {
		let mut updates = self.status.subscribe();
		let status = match updates.wait_for(|status| *status != ProviderStatus::NotReady).await {
			Ok(status) => *status,
			Err(_) => self.status(),
		};

		match status {
			ProviderStatus::Error => Err(self.error.lock().clone().unwrap_or_else(|| {
				FlagsError::Initialization {
					provider: provider.to_string(),
					message: "provider is in an error state".to_string(),
				}
			})),
			ProviderStatus::Ready | ProviderStatus::NotReady => Ok(()),
		}
	}

	/// Runs `init` unless a previous run already succeeded.
	///
	/// Concurrent callers wait for the run in flight. A failed run is not
	/// remembered, so the next caller tries again.
	pub(crate) async fn initialize_once<F, Fut>(&self, init: F) -> Result<(), FlagsError>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<(), FlagsError>>,
	{
		self.initialized.get_or_try_init(init).await.map(|_| ())
	}
}

impl Default for ProviderRecord {
	fn default() -> Self {
		Self::with_status(ProviderStatus::NotReady)
	}
}

struct Slot {
	provider: SharedProvider,
	generation: u64,
	subscription: Option<Subscription>,
}

impl Slot {
	fn unsubscribe(&mut self) {
		if let Some(subscription) = self.subscription.take() {
			subscription.cancel();
		}
	}
}

struct RegistryState {
	default: Slot,
	named: HashMap<String, Slot>,
	records: HashMap<usize, Arc<ProviderRecord>>,
	next_generation: u64,
}

impl RegistryState {
	fn slot(&self, name: Option<&str>) -> Option<&Slot> {
		match name {
			Some(name) => self.named.get(name),
			None => Some(&self.default),
		}
	}

	fn resolve(&self, name: Option<&str>) -> &Slot {
		name.and_then(|n| self.named.get(n)).unwrap_or(&self.default)
	}

	fn slots(&self) -> impl Iterator<Item = &Slot> {
		std::iter::once(&self.default).chain(self.named.values())
	}

	fn references(&self, provider: &SharedProvider) -> bool {
		self.slots().any(|slot| same_provider(&slot.provider, provider))
	}

	fn names_holding(&self, provider: &SharedProvider) -> Vec<Option<String>> {
		let mut names: Vec<Option<String>> = self
			.named
			.iter()
			.filter(|(_, slot)| same_provider(&slot.provider, provider))
			.map(|(name, _)| Some(name.clone()))
			.collect();
		names.sort();
		if same_provider(&self.default.provider, provider) {
			names.insert(0, None);
		}
		names
	}

	fn record(&self, provider: &SharedProvider) -> Option<&Arc<ProviderRecord>> {
		self.records.get(&provider_key(provider))
	}
}

/// Outcome of installing a provider into a slot.
pub(crate) struct Swap {
	/// What the slot held before, if it was bound. Pass it to
	/// [`ProviderRegistry::release`] once the bind is done with it.
	pub previous: Option<SharedProvider>,
	pub record: Arc<ProviderRecord>,
	pub generation: u64,
}

pub struct ProviderRegistry {
	state: Mutex<RegistryState>,
}

impl ProviderRegistry {
	/// Creates a registry whose default slot holds a [`NoopProvider`].
	pub fn new() -> Self {
		let provider: SharedProvider = Arc::new(NoopProvider::new());
		let mut records = HashMap::new();
		records.insert(
			provider_key(&provider),
			Arc::new(ProviderRecord::with_status(ProviderStatus::Ready)),
		);
		Self {
			state: Mutex::new(RegistryState {
				default: Slot {
					provider,
					generation: 0,
					subscription: None,
				},
				named: HashMap::new(),
				records,
				next_generation: 1,
			}),
		}
	}

	/// Provider serving `name`, falling back to the default slot.
	pub fn provider_for(&self, name: Option<&str>) -> SharedProvider {
		Arc::clone(&self.state.lock().resolve(name).provider)
	}

	/// Status of the provider serving `name`.
	pub fn status_for(&self, name: Option<&str>) -> ProviderStatus {
		let state = self.state.lock();
		let slot = state.resolve(name);
		state
			.record(&slot.provider)
			.map_or(ProviderStatus::NotReady, |record| record.status())
	}

	/// Whether `name` has a provider bound to it explicitly.
	pub fn is_bound(&self, name: &str) -> bool {
		self.state.lock().named.contains_key(name)
	}

	pub fn bound_names(&self) -> HashSet<String> {
		self.state.lock().named.keys().cloned().collect()
	}

	/// Every distinct provider currently held by any slot, default first.
	pub fn distinct_providers(&self) -> Vec<SharedProvider> {
		let state = self.state.lock();
		let mut providers: Vec<SharedProvider> = Vec::new();
		for slot in state.slots() {
			if !providers.iter().any(|p| same_provider(p, &slot.provider)) {
				providers.push(Arc::clone(&slot.provider));
			}
		}
		providers
	}

	/// Slots whose provider is currently Ready, default slot first.
	pub fn ready_slots(&self) -> Vec<(Option<String>, SharedProvider)> {
		let state = self.state.lock();
		let is_ready = |slot: &Slot| {
			state
				.record(&slot.provider)
				.is_some_and(|record| record.status() == ProviderStatus::Ready)
		};

		let mut ready = Vec::new();
		if is_ready(&state.default) {
			ready.push((None, Arc::clone(&state.default.provider)));
		}
		let mut named: Vec<_> = state
			.named
			.iter()
			.filter(|(_, slot)| is_ready(slot))
			.map(|(name, slot)| (Some(name.clone()), Arc::clone(&slot.provider)))
			.collect();
		named.sort_by(|a, b| a.0.cmp(&b.0));
		ready.extend(named);
		ready
	}

	/// Whether the bind identified by `generation` is still what `name` holds.
	pub(crate) fn is_current(&self, name: Option<&str>, generation: u64) -> bool {
		self.state
			.lock()
			.slot(name)
			.is_some_and(|slot| slot.generation == generation)
	}

	pub(crate) fn record_for(&self, provider: &SharedProvider) -> Option<Arc<ProviderRecord>> {
		self.state.lock().record(provider).map(Arc::clone)
	}

	/// Every slot currently holding `provider`, default slot first.
	pub(crate) fn names_holding(&self, provider: &SharedProvider) -> Vec<Option<String>> {
		self.state.lock().names_holding(provider)
	}

	/// Drops the record for `provider` if no slot references it any more.
	///
	/// Returns true exactly once per record: the caller that gets true owns
	/// closing the provider. Deciding and removing happen under one lock
	/// acquisition, so a concurrent rebind either keeps the record alive or
	/// starts a fresh one.
	pub(crate) fn release(&self, provider: &SharedProvider) -> bool {
		let mut state = self.state.lock();
		if state.references(provider) {
			debug!(provider = %provider.metadata().name, "Provider still bound elsewhere");
			return false;
		}
		state.records.remove(&provider_key(provider)).is_some()
	}

	/// Installs `provider` into the slot for `name`.
	///
	/// Returns `None` without touching anything if the slot already holds
	/// this exact instance. Otherwise, under one lock acquisition: the old
	/// provider's subscription is cancelled, `wire` is called to subscribe
	/// to the new provider, and the slot is replaced. The old provider's
	/// record stays until [`release`](Self::release) is called for it.
	pub(crate) fn swap<W>(&self, name: Option<&str>, provider: SharedProvider, wire: W) -> Option<Swap>
	where
		W: FnOnce(u64, &Arc<ProviderRecord>) -> Option<Subscription>,
	{
		let mut state = self.state.lock();

		if let Some(current) = state.slot(name) {
			if same_provider(&current.provider, &provider) {
				return None;
			}
		}

		let generation = state.next_generation;
		state.next_generation += 1;

		let record = Arc::clone(
			state
				.records
				.entry(provider_key(&provider))
				.or_insert_with(|| Arc::new(ProviderRecord::default())),
		);
		let subscription = wire(generation, &record);
		let slot = Slot {
			provider,
			generation,
			subscription,
		};

		let previous = match name {
			Some(name) => state.named.insert(name.to_string(), slot),
			None => Some(std::mem::replace(&mut state.default, slot)),
		};

		let previous = previous.map(|mut old| {
			old.unsubscribe();
			old.provider
		});

		debug!(
			client = ?name,
			generation,
			replaced = previous.is_some(),
			"Provider slot updated"
		);

		Some(Swap {
			previous,
			record,
			generation,
		})
	}
}

impl Default for ProviderRegistry {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_flags_runtime_core::ProviderMetadata;

	use crate::provider::FeatureProvider;

	struct Named(ProviderMetadata);

	#[async_trait::async_trait]
	impl FeatureProvider for Named {
		fn metadata(&self) -> &ProviderMetadata {
			&self.0
		}
	}

	fn provider(name: &str) -> SharedProvider {
		Arc::new(Named(ProviderMetadata::new(name)))
	}

	fn install(registry: &ProviderRegistry, name: Option<&str>, p: &SharedProvider) -> Option<Swap> {
		registry.swap(name, Arc::clone(p), |_, _| None)
	}

	#[test]
	fn default_slot_starts_with_ready_noop() {
		let registry = ProviderRegistry::new();
		assert_eq!(registry.provider_for(None).metadata().name, NoopProvider::NAME);
		assert_eq!(registry.status_for(None), ProviderStatus::Ready);
	}

	#[test]
	fn unbound_names_follow_the_default_slot() {
		let registry = ProviderRegistry::new();
		let a = provider("a");
		install(&registry, None, &a);

		assert!(same_provider(&registry.provider_for(Some("svc")), &a));
		assert!(!registry.is_bound("svc"));

		let b = provider("b");
		install(&registry, None, &b);
		assert!(same_provider(&registry.provider_for(Some("svc")), &b));
	}

	#[test]
	fn same_instance_is_a_noop() {
		let registry = ProviderRegistry::new();
		let a = provider("a");
		assert!(install(&registry, Some("svc"), &a).is_some());
		assert!(install(&registry, Some("svc"), &a).is_none());
	}

	#[test]
	fn binding_unbound_name_to_default_provider_creates_binding() {
		let registry = ProviderRegistry::new();
		let default = registry.provider_for(None);
		let swap = install(&registry, Some("svc"), &default).unwrap();

		assert!(swap.previous.is_none());
		assert!(registry.is_bound("svc"));
	}

	#[test]
	fn previous_provider_kept_while_referenced() {
		let registry = ProviderRegistry::new();
		let c = provider("c");
		let d = provider("d");
		install(&registry, Some("a"), &c);
		install(&registry, Some("b"), &c);

		install(&registry, Some("a"), &d);
		assert!(!registry.release(&c));
		assert!(registry.record_for(&c).is_some());

		let swap = install(&registry, Some("b"), &d).unwrap();
		assert!(same_provider(swap.previous.as_ref().unwrap(), &c));
		assert!(registry.record_for(&c).is_some());
		assert!(registry.release(&c));
		assert!(registry.record_for(&c).is_none());
	}

	#[test]
	fn release_succeeds_once() {
		let registry = ProviderRegistry::new();
		let c = provider("c");
		install(&registry, Some("a"), &c);
		install(&registry, Some("a"), &provider("d"));

		assert!(registry.release(&c));
		assert!(!registry.release(&c));
	}

	#[test]
	fn rebinding_before_release_keeps_the_record() {
		let registry = ProviderRegistry::new();
		let c = provider("c");
		let first = install(&registry, Some("a"), &c).unwrap();
		install(&registry, Some("a"), &provider("d"));
		let again = install(&registry, Some("b"), &c).unwrap();

		assert!(!registry.release(&c));
		assert!(Arc::ptr_eq(&first.record, &again.record));
	}

	#[test]
	fn names_holding_lists_every_slot() {
		let registry = ProviderRegistry::new();
		let c = provider("c");
		install(&registry, None, &c);
		install(&registry, Some("b"), &c);
		install(&registry, Some("a"), &c);
		install(&registry, Some("z"), &provider("other"));

		assert_eq!(
			registry.names_holding(&c),
			vec![None, Some("a".to_string()), Some("b".to_string())]
		);
	}

	#[test]
	fn default_slot_counts_as_a_reference() {
		let registry = ProviderRegistry::new();
		let c = provider("c");
		install(&registry, None, &c);
		install(&registry, Some("a"), &c);

		install(&registry, Some("a"), &provider("d"));
		assert!(!registry.release(&c));
	}

	#[test]
	fn shared_provider_shares_one_record() {
		let registry = ProviderRegistry::new();
		let c = provider("c");
		let first = install(&registry, Some("a"), &c).unwrap();
		let second = install(&registry, Some("b"), &c).unwrap();
		assert!(Arc::ptr_eq(&first.record, &second.record));
	}

	#[test]
	fn generations_identify_the_latest_bind() {
		let registry = ProviderRegistry::new();
		let first = install(&registry, Some("a"), &provider("1")).unwrap();
		assert!(registry.is_current(Some("a"), first.generation));

		let second = install(&registry, Some("a"), &provider("2")).unwrap();
		assert!(!registry.is_current(Some("a"), first.generation));
		assert!(registry.is_current(Some("a"), second.generation));
		assert!(!registry.is_current(Some("other"), second.generation));
	}

	#[test]
	fn distinct_providers_deduplicates() {
		let registry = ProviderRegistry::new();
		let c = provider("c");
		install(&registry, Some("a"), &c);
		install(&registry, Some("b"), &c);
		install(&registry, Some("d"), &c);

		let providers = registry.distinct_providers();
		assert_eq!(providers.len(), 2);
		assert_eq!(providers[0].metadata().name, NoopProvider::NAME);
	}

	#[test]
	fn ready_slots_reflect_record_status() {
		let registry = ProviderRegistry::new();
		let c = provider("c");
		let swap = install(&registry, Some("b"), &c).unwrap();
		install(&registry, Some("a"), &c);

		let names: Vec<_> = registry.ready_slots().into_iter().map(|(n, _)| n).collect();
		assert_eq!(names, vec![None]);

		swap.record.set_status(ProviderStatus::Ready);
		let names: Vec<_> = registry.ready_slots().into_iter().map(|(n, _)| n).collect();
		assert_eq!(names, vec![None, Some("a".to_string()), Some("b".to_string())]);
	}

	#[tokio::test]
	async fn initialize_once_memoizes_success_only() {
		use std::sync::atomic::{AtomicUsize, Ordering};

		let record = ProviderRecord::default();
		let calls = AtomicUsize::new(0);
		let calls = &calls;

		let failing = record
			.initialize_once(|| async move {
				calls.fetch_add(1, Ordering::SeqCst);
				Err(FlagsError::Initialization {
					provider: "p".to_string(),
					message: "boom".to_string(),
				})
			})
			.await;
		assert!(failing.is_err());

		for _ in 0..2 {
			record
				.initialize_once(|| async move {
					calls.fetch_add(1, Ordering::SeqCst);
					Ok(())
				})
				.await
				.unwrap();
		}

		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn settled_waits_for_initialization_outcome() {
		let record = Arc::new(ProviderRecord::default());
		let waiter = Arc::clone(&record);
		let settled = tokio::spawn(async move { waiter.settled("p").await });
		tokio::task::yield_now().await;
		assert!(!settled.is_finished());

		record.fail(FlagsError::Initialization {
			provider: "p".to_string(),
			message: "boom".to_string(),
		});

		let err = settled.await.unwrap().unwrap_err();
		assert_eq!(err.event_message(), "boom");
	}

	#[tokio::test]
	async fn settled_reports_provider_emitted_error_generically() {
		let record = ProviderRecord::with_status(ProviderStatus::Error);
		let err = record.settled("p").await.unwrap_err();
		assert!(matches!(err, FlagsError::Initialization { ref provider, .. } if provider == "p"));

		record.set_status(ProviderStatus::Ready);
		assert!(record.settled("p").await.is_ok());
	}
}
