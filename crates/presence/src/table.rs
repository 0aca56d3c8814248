//! Live presence and typing records, keyed by resource.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use tandem_primitives::{ActorId, ResourceKey};

use crate::record::{PresenceRecord, TypingRecord};

/// Which of a resource's sets changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Changed {
	pub(crate) presence: bool,
	pub(crate) typing: bool,
}

impl Changed {
	pub(crate) const PRESENCE: Self = Self {
		presence: true,
		typing: false,
	};
	pub(crate) const TYPING: Self = Self {
		presence: false,
		typing: true,
	};

	pub(crate) fn any(self) -> bool {
		self.presence || self.typing
	}
}

/// Result of inserting a presence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Upsert {
	/// New record, or the activity changed.
	Changed,
	/// Same activity with a newer timestamp.
	Renewed,
	/// Older than the record already held.
	Stale,
}

#[derive(Debug, Default)]
struct Slot {
	presence: IndexMap<ActorId, PresenceRecord>,
	typing: IndexMap<(ActorId, String), TypingRecord>,
}

impl Slot {
	fn is_empty(&self) -> bool {
		self.presence.is_empty() && self.typing.is_empty()
	}
}

#[derive(Debug, Default)]
pub(crate) struct PresenceTable {
	slots: HashMap<ResourceKey, Slot>,
}

impl PresenceTable {
	pub(crate) fn upsert(&mut self, record: PresenceRecord) -> Upsert {
		let slot = self.slots.entry(record.key.clone()).or_default();
		match slot.presence.get_mut(&record.actor) {
			Some(existing) if existing.last_activity_at > record.last_activity_at => Upsert::Stale,
			Some(existing) if existing.same_activity(&record) => {
				existing.last_activity_at = record.last_activity_at;
				Upsert::Renewed
			}
			Some(existing) => {
				*existing = record;
				Upsert::Changed
			}
			None => {
				slot.presence.insert(record.actor.clone(), record);
				Upsert::Changed
			}
		}
	}

	/// Bumps `actor`'s record on `key` to `at`, returning the renewed record.
	pub(crate) fn renew(&mut self, key: &ResourceKey, actor: &ActorId, at: DateTime<Utc>) -> Option<PresenceRecord> {
		let record = self.slots.get_mut(key)?.presence.get_mut(actor)?;
		if at > record.last_activity_at {
			record.last_activity_at = at;
		}
		Some(record.clone())
	}

	/// Removes every record `actor` holds on `key` that is not newer than `at`.
	pub(crate) fn withdraw(&mut self, key: &ResourceKey, actor: &ActorId, at: DateTime<Utc>) -> Changed {
		let Some(slot) = self.slots.get_mut(key) else {
			return Changed::default();
		};
		let presence = match slot.presence.get(actor) {
			Some(record) if record.last_activity_at <= at => slot.presence.shift_remove(actor).is_some(),
			_ => false,
		};
		let before = slot.typing.len();
		slot.typing.retain(|(owner, _), record| owner != actor || record.updated_at > at);
		let changed = Changed {
			presence,
			typing: slot.typing.len() != before,
		};
		if slot.is_empty() {
			self.slots.remove(key);
		}
		changed
	}

	/// Returns false if the record is older than the one already held.
	pub(crate) fn set_typing(&mut self, record: TypingRecord) -> bool {
		let slot = self.slots.entry(record.key.clone()).or_default();
		let id = (record.actor.clone(), record.field.clone());
		match slot.typing.get(&id) {
			Some(existing) if existing.updated_at > record.updated_at => false,
			_ => {
				slot.typing.insert(id, record);
				true
			}
		}
	}

	/// Drops records whose age exceeds their TTL. Returns the total removed
	/// and the resources whose sets changed.
	pub(crate) fn sweep(&mut self, now: DateTime<Utc>, ttl: TimeDelta, typing_ttl: TimeDelta) -> (usize, Vec<(ResourceKey, Changed)>) {
		let mut removed = 0;
		let mut affected = Vec::new();
		self.slots.retain(|key, slot| {
			let presence_before = slot.presence.len();
			slot.presence.retain(|_, record| now - record.last_activity_at <= ttl);
			let typing_before = slot.typing.len();
			slot.typing.retain(|_, record| now - record.updated_at <= typing_ttl);

			let changed = Changed {
				presence: slot.presence.len() != presence_before,
				typing: slot.typing.len() != typing_before,
			};
			if changed.any() {
				removed += presence_before - slot.presence.len() + typing_before - slot.typing.len();
				affected.push((key.clone(), changed));
			}
			!slot.is_empty()
		});
		(removed, affected)
	}

	pub(crate) fn presence(&self, key: &ResourceKey) -> Vec<PresenceRecord> {
		self.slots.get(key).map(|slot| slot.presence.values().cloned().collect()).unwrap_or_default()
	}

	pub(crate) fn typing(&self, key: &ResourceKey) -> Vec<TypingRecord> {
		self.slots.get(key).map(|slot| slot.typing.values().cloned().collect()).unwrap_or_default()
	}
}
