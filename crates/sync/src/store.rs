//! Entity store: current (possibly optimistic) value per resource.
//!
//! Slots live in a slab arena indexed by resource key. A slot with
//! `overlay: Some(_)` carries a pending optimistic mutation; the overlay holds
//! the pre-image captured by the first [`EntityStore::apply`] and is never
//! overwritten until the slot is replaced or reverted.

use std::collections::{BTreeMap, HashMap};

use slab::Slab;
use tandem_primitives::{Fields, ResourceKey};

/// Value of one resource at a point in time; `None` means absent.
pub type Snapshot = Option<Fields>;

/// Whole-collection copy, as recorded in the history ledger.
pub type Collection = BTreeMap<ResourceKey, Fields>;

/// Kind of state change reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
	/// Optimistic value applied over the canonical one.
	Optimistic,
	/// Canonical value installed; overlay cleared.
	Canonical,
	/// Overlay rolled back to its pre-image.
	Reverted,
	/// Resource dropped from the store.
	Removed,
	/// Value materialized from an undo/redo snapshot.
	Restored,
}

/// Notification emitted after every state change.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
	pub key: ResourceKey,
	pub change: StoreChange,
	pub value: Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnMut(&StoreEvent) + Send>;

#[derive(Debug)]
struct Slot {
	key: ResourceKey,
	value: Snapshot,
	overlay: Option<Snapshot>,
}

/// Arena of resource slots with rollback pre-images.
#[derive(Default)]
pub struct EntityStore {
	slots: Slab<Slot>,
	index: HashMap<ResourceKey, usize>,
	observers: Vec<(ObserverId, Observer)>,
	next_observer: u64,
}

impl EntityStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, key: &ResourceKey) -> Option<&Fields> {
		self.slot(key).and_then(|slot| slot.value.as_ref())
	}

	pub fn contains(&self, key: &ResourceKey) -> bool {
		self.get(key).is_some()
	}

	/// Returns true while `key` carries an uncommitted optimistic value.
	pub fn has_overlay(&self, key: &ResourceKey) -> bool {
		self.slot(key).is_some_and(|slot| slot.overlay.is_some())
	}

	/// Pre-image captured for the pending overlay on `key`.
	pub fn pre_image(&self, key: &ResourceKey) -> Option<&Snapshot> {
		self.slot(key).and_then(|slot| slot.overlay.as_ref())
	}

	/// Number of resident resources.
	pub fn len(&self) -> usize {
		self.slots.iter().filter(|(_, slot)| slot.value.is_some()).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Applies `mutate` optimistically and returns the pre-image.
	///
	/// If an overlay is already pending the original pre-image is kept and
	/// returned, so a later rollback still lands on the last canonical value.
	pub fn apply<F>(&mut self, key: &ResourceKey, mutate: F) -> Snapshot
	where
		F: FnOnce(Option<&Fields>) -> Snapshot,
	{
		let idx = self.slot_or_insert(key);
		let slot = &mut self.slots[idx];
		let pre_image = slot.overlay.get_or_insert_with(|| slot.value.clone()).clone();
		slot.value = mutate(slot.value.as_ref());
		let value = slot.value.clone();
		self.notify(key, StoreChange::Optimistic, value);
		pre_image
	}

	/// Overwrites the visible value without touching a pending overlay.
	pub fn set_optimistic(&mut self, key: &ResourceKey, value: Snapshot) {
		let idx = self.slot_or_insert(key);
		self.slots[idx].value = value.clone();
		self.notify(key, StoreChange::Optimistic, value);
		self.compact(key);
	}

	/// Installs a canonical value and clears any overlay.
	pub fn replace(&mut self, key: &ResourceKey, canonical: Fields) {
		let idx = self.slot_or_insert(key);
		let slot = &mut self.slots[idx];
		slot.value = Some(canonical.clone());
		slot.overlay = None;
		self.notify(key, StoreChange::Canonical, Some(canonical));
	}

	/// Rolls `key` back to `snapshot` and clears its overlay.
	pub fn revert(&mut self, key: &ResourceKey, snapshot: Snapshot) {
		let idx = self.slot_or_insert(key);
		let slot = &mut self.slots[idx];
		slot.value = snapshot.clone();
		slot.overlay = None;
		self.notify(key, StoreChange::Reverted, snapshot);
		self.compact(key);
	}

	/// Drops `key` entirely, including any overlay.
	pub fn remove(&mut self, key: &ResourceKey) -> Snapshot {
		let idx = self.index.remove(key)?;
		let slot = self.slots.remove(idx);
		self.notify(key, StoreChange::Removed, None);
		slot.value
	}

	/// Copy of every resident value.
	pub fn collection(&self) -> Collection {
		self.slots
			.iter()
			.filter_map(|(_, slot)| slot.value.as_ref().map(|value| (slot.key.clone(), value.clone())))
			.collect()
	}

	/// Copy of the last canonical value of every resource: a slot with a
	/// pending overlay contributes its pre-image, not its optimistic value.
	pub fn canonical_collection(&self) -> Collection {
		self.slots
			.iter()
			.filter_map(|(_, slot)| {
				let canonical = slot.overlay.as_ref().unwrap_or(&slot.value);
				canonical.as_ref().map(|value| (slot.key.clone(), value.clone()))
			})
			.collect()
	}

	/// [`Self::canonical_collection`] with the given keys substituted.
	pub fn canonical_with<'a>(&self, overrides: impl IntoIterator<Item = (&'a ResourceKey, &'a Snapshot)>) -> Collection {
		let mut collection = self.canonical_collection();
		for (key, snapshot) in overrides {
			match snapshot {
				Some(value) => collection.insert(key.clone(), value.clone()),
				None => collection.remove(key),
			};
		}
		collection
	}

	/// Materializes `snapshot` into every slot without a pending overlay.
	///
	/// Slots with an overlay keep their optimistic value; their in-flight
	/// commit decides the outcome.
	pub fn restore_collection(&mut self, snapshot: &Collection) {
		let stale: Vec<ResourceKey> = self
			.slots
			.iter()
			.filter(|(_, slot)| slot.overlay.is_none() && slot.value.is_some() && !snapshot.contains_key(&slot.key))
			.map(|(_, slot)| slot.key.clone())
			.collect();
		for key in stale {
			let idx = self.index[&key];
			self.slots[idx].value = None;
			self.notify(&key, StoreChange::Restored, None);
			self.compact(&key);
		}

		for (key, value) in snapshot {
			if self.has_overlay(key) || self.get(key) == Some(value) {
				continue;
			}
			let idx = self.slot_or_insert(key);
			self.slots[idx].value = Some(value.clone());
			self.notify(key, StoreChange::Restored, Some(value.clone()));
		}
	}

	/// Registers an observer called synchronously after every change.
	pub fn observe(&mut self, observer: impl FnMut(&StoreEvent) + Send + 'static) -> ObserverId {
		self.next_observer += 1;
		let id = ObserverId(self.next_observer);
		self.observers.push((id, Box::new(observer)));
		id
	}

	pub fn unobserve(&mut self, id: ObserverId) -> bool {
		let before = self.observers.len();
		self.observers.retain(|(existing, _)| *existing != id);
		self.observers.len() != before
	}

	fn slot(&self, key: &ResourceKey) -> Option<&Slot> {
		self.index.get(key).map(|&idx| &self.slots[idx])
	}

	fn slot_or_insert(&mut self, key: &ResourceKey) -> usize {
		if let Some(&idx) = self.index.get(key) {
			return idx;
		}
		let idx = self.slots.insert(Slot {
			key: key.clone(),
			value: None,
			overlay: None,
		});
		self.index.insert(key.clone(), idx);
		idx
	}

	/// Frees slots that hold neither a value nor an overlay.
	fn compact(&mut self, key: &ResourceKey) {
		if let Some(&idx) = self.index.get(key)
			&& self.slots[idx].value.is_none()
			&& self.slots[idx].overlay.is_none()
		{
			self.index.remove(key);
			self.slots.remove(idx);
		}
	}

	fn notify(&mut self, key: &ResourceKey, change: StoreChange, value: Snapshot) {
		if self.observers.is_empty() {
			return;
		}
		let event = StoreEvent {
			key: key.clone(),
			change,
			value,
		};
		for (_, observer) in &mut self.observers {
			observer(&event);
		}
	}
}
