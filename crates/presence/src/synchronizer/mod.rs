//! Presence synchronizer.
//!
//! Local announcements update the table and are published on the resource's
//! presence topic; messages from other actors are folded into the same table.
//! Every local subscriber of a resource shares one channel subscription, which
//! is released with the last [`PresenceSubscription`]. Callbacks run after the
//! internal lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use slab::Slab;
use tandem_channel::{Channel, MessageHandler, ScopedSubscription, Topic};
use tandem_primitives::{Clock, Identity, ResourceKey, SystemClock};
use tandem_worker::{CancellationToken, TaskClass};
use tokio::task::JoinHandle;

use crate::config::PresenceConfig;
use crate::error::PresenceError;
use crate::message::PresenceMessage;
use crate::record::{PresenceRecord, PresenceType, TypingRecord};
use crate::table::{Changed, PresenceTable, Upsert};

/// Receives the full live presence set of a resource.
pub type PresenceCallback = Arc<dyn Fn(&[PresenceRecord]) + Send + Sync>;
/// Receives the full live typing set of a resource.
pub type TypingCallback = Arc<dyn Fn(&[TypingRecord]) + Send + Sync>;

#[derive(Clone)]
struct Listener {
	on_presence: PresenceCallback,
	on_typing: TypingCallback,
}

/// Local subscribers of one resource and the channel subscription feeding them.
#[derive(Default)]
struct Feed {
	scoped: Option<ScopedSubscription>,
	listeners: Slab<Listener>,
}

#[derive(Default)]
struct State {
	table: PresenceTable,
	feeds: HashMap<ResourceKey, Feed>,
	/// Last published heartbeat or announce per resource, for throttling.
	last_published: HashMap<ResourceKey, DateTime<Utc>>,
}

/// Callbacks and the sets to hand them, captured under the lock.
struct Notice {
	listeners: Vec<Listener>,
	presence: Option<Vec<PresenceRecord>>,
	typing: Option<Vec<TypingRecord>>,
}

impl Notice {
	fn deliver(self) {
		for listener in &self.listeners {
			if let Some(presence) = &self.presence {
				(listener.on_presence)(presence);
			}
			if let Some(typing) = &self.typing {
				(listener.on_typing)(typing);
			}
		}
	}
}

impl State {
	fn notice(&self, key: &ResourceKey, changed: Changed) -> Option<Notice> {
		if !changed.any() {
			return None;
		}
		let feed = self.feeds.get(key)?;
		if feed.listeners.is_empty() {
			return None;
		}
		Some(Notice {
			listeners: feed.listeners.iter().map(|(_, listener)| listener.clone()).collect(),
			presence: changed.presence.then(|| self.table.presence(key)),
			typing: changed.typing.then(|| self.table.typing(key)),
		})
	}

	fn apply(&mut self, message: PresenceMessage) -> (ResourceKey, Changed) {
		let key = message.key().clone();
		let changed = match message {
			PresenceMessage::Announce(record) | PresenceMessage::Heartbeat(record) => match self.table.upsert(record) {
				Upsert::Changed => Changed::PRESENCE,
				Upsert::Renewed | Upsert::Stale => Changed::default(),
			},
			PresenceMessage::Withdraw { key, actor, at } => self.table.withdraw(&key, &actor, at),
			PresenceMessage::Typing(record) => {
				if self.table.set_typing(record) {
					Changed::TYPING
				} else {
					Changed::default()
				}
			}
		};
		(key, changed)
	}
}

struct Inner {
	channel: Arc<dyn Channel>,
	identity: Identity,
	config: PresenceConfig,
	clock: Arc<dyn Clock>,
	state: Mutex<State>,
}

fn delta(duration: std::time::Duration) -> TimeDelta {
	TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

impl Inner {
	fn with_state<R>(&self, f: impl FnOnce(&mut State) -> (R, Option<Notice>)) -> R {
		let (out, notice) = f(&mut self.state.lock());
		if let Some(notice) = notice {
			notice.deliver();
		}
		out
	}

	/// Folds a message received on a presence topic into the table.
	fn ingest(&self, value: &Value) {
		let message: PresenceMessage = match serde_json::from_value(value.clone()) {
			Ok(message) => message,
			Err(error) => {
				tracing::debug!(%error, "presence.message.malformed");
				return;
			}
		};
		if message.actor() == &self.identity.actor {
			return;
		}
		tracing::trace!(key = %message.key(), actor = %message.actor(), kind = message.as_str(), "presence.message.received");
		self.with_state(|state| {
			let (key, changed) = state.apply(message);
			((), state.notice(&key, changed))
		});
	}

	fn sweep_at(&self, now: DateTime<Utc>) -> usize {
		let ttl = delta(self.config.ttl());
		let typing_ttl = delta(self.config.typing_ttl());
		let (removed, notices) = {
			let mut state = self.state.lock();
			let (removed, affected) = state.table.sweep(now, ttl, typing_ttl);
			let notices: Vec<Notice> = affected.into_iter().filter_map(|(key, changed)| state.notice(&key, changed)).collect();
			(removed, notices)
		};
		if removed > 0 {
			tracing::debug!(removed, "presence.sweep.expired");
		}
		for notice in notices {
			notice.deliver();
		}
		removed
	}

	/// Removes listener `id` from `key`, handing back the channel subscription
	/// if it was the last one.
	fn detach(&self, key: &ResourceKey, id: usize) -> Option<ScopedSubscription> {
		let mut state = self.state.lock();
		let feed = state.feeds.get_mut(key)?;
		feed.listeners.try_remove(id);
		if !feed.listeners.is_empty() {
			return None;
		}
		tracing::debug!(%key, "presence.feed.closed");
		state.feeds.remove(key).and_then(|feed| feed.scoped)
	}
}

/// Publishes local presence and mirrors everyone else's.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PresenceSynchronizer {
	inner: Arc<Inner>,
}

impl PresenceSynchronizer {
	pub fn new(channel: Arc<dyn Channel>, identity: Identity, config: PresenceConfig) -> Self {
		Self::with_clock(channel, identity, config, Arc::new(SystemClock))
	}

	pub fn with_clock(channel: Arc<dyn Channel>, identity: Identity, config: PresenceConfig, clock: Arc<dyn Clock>) -> Self {
		Self {
			inner: Arc::new(Inner {
				channel,
				identity,
				config,
				clock,
				state: Mutex::new(State::default()),
			}),
		}
	}

	pub fn identity(&self) -> &Identity {
		&self.inner.identity
	}

	pub fn config(&self) -> &PresenceConfig {
		&self.inner.config
	}

	/// Records and publishes the local actor's presence on `key`, replacing
	/// any previous activity there.
	pub async fn announce(&self, key: &ResourceKey, presence_type: PresenceType, field: Option<&str>) -> Result<PresenceRecord, PresenceError> {
		let record = PresenceRecord {
			key: key.clone(),
			actor: self.inner.identity.actor.clone(),
			display_name: self.inner.identity.display_name.clone(),
			presence_type,
			field: field.map(str::to_string),
			last_activity_at: self.inner.clock.now(),
		};
		self.inner.with_state(|state| {
			let changed = match state.table.upsert(record.clone()) {
				Upsert::Changed => Changed::PRESENCE,
				Upsert::Renewed | Upsert::Stale => Changed::default(),
			};
			state.last_published.insert(key.clone(), record.last_activity_at);
			((), state.notice(key, changed))
		});

		tracing::debug!(%key, presence = %presence_type, field = ?record.field, "presence.announce");
		self.publish(PresenceMessage::Announce(record.clone())).await?;
		Ok(record)
	}

	/// Removes the local actor's presence and typing records on `key`.
	pub async fn withdraw(&self, key: &ResourceKey) -> Result<(), PresenceError> {
		let at = self.inner.clock.now();
		let actor = self.inner.identity.actor.clone();
		self.inner.with_state(|state| {
			let changed = state.table.withdraw(key, &actor, at);
			state.last_published.remove(key);
			((), state.notice(key, changed))
		});

		tracing::debug!(%key, "presence.withdraw");
		self.publish(PresenceMessage::Withdraw { key: key.clone(), actor, at }).await
	}

	/// Renews the local record on `key`.
	///
	/// Renewal always applies locally; the heartbeat is published only if the
	/// throttle interval has passed since the last publish. Returns whether
	/// it was published.
	pub async fn heartbeat(&self, key: &ResourceKey) -> Result<bool, PresenceError> {
		let now = self.inner.clock.now();
		let throttle = delta(self.inner.config.heartbeat_throttle());
		let renewed = {
			let mut state = self.inner.state.lock();
			match state.table.renew(key, &self.inner.identity.actor, now) {
				None => None,
				Some(record) => {
					let due = state.last_published.get(key).is_none_or(|last| now - *last >= throttle);
					if due {
						state.last_published.insert(key.clone(), now);
					}
					Some(due.then_some(record))
				}
			}
		};

		match renewed {
			None => Err(PresenceError::NotAnnounced(key.clone())),
			Some(None) => Ok(false),
			Some(Some(record)) => {
				tracing::trace!(%key, "presence.heartbeat");
				self.publish(PresenceMessage::Heartbeat(record)).await?;
				Ok(true)
			}
		}
	}

	/// Publishes whether the local actor is typing in `field`.
	pub async fn set_typing(&self, key: &ResourceKey, field: &str, is_typing: bool) -> Result<TypingRecord, PresenceError> {
		let record = TypingRecord {
			key: key.clone(),
			actor: self.inner.identity.actor.clone(),
			display_name: self.inner.identity.display_name.clone(),
			field: field.to_string(),
			is_typing,
			updated_at: self.inner.clock.now(),
		};
		self.inner.with_state(|state| {
			let changed = if state.table.set_typing(record.clone()) { Changed::TYPING } else { Changed::default() };
			((), state.notice(key, changed))
		});

		tracing::trace!(%key, field, is_typing, "presence.typing");
		self.publish(PresenceMessage::Typing(record.clone())).await?;
		Ok(record)
	}

	/// Subscribes to presence and typing on `key`.
	///
	/// Both callbacks are invoked once immediately with the current sets and
	/// again whenever either set changes.
	pub async fn subscribe(
		&self,
		key: &ResourceKey,
		on_presence: impl Fn(&[PresenceRecord]) + Send + Sync + 'static,
		on_typing: impl Fn(&[TypingRecord]) + Send + Sync + 'static,
	) -> Result<PresenceSubscription, PresenceError> {
		let listener = Listener {
			on_presence: Arc::new(on_presence),
			on_typing: Arc::new(on_typing),
		};

		let mut opened: Option<ScopedSubscription> = None;
		let (id, presence, typing, surplus) = loop {
			let attached = {
				let mut guard = self.inner.state.lock();
				let state = &mut *guard;
				let has_feed = state.feeds.get(key).is_some_and(|feed| feed.scoped.is_some());
				if has_feed || opened.is_some() {
					let feed = state.feeds.entry(key.clone()).or_default();
					// A concurrent subscribe may have opened the feed while we awaited ours.
					let surplus = if has_feed {
						opened.take()
					} else {
						feed.scoped = opened.take();
						None
					};
					let id = feed.listeners.insert(listener.clone());
					Some((id, state.table.presence(key), state.table.typing(key), surplus))
				} else {
					None
				}
			};
			match attached {
				Some(attached) => break attached,
				None => opened = Some(self.open_feed(key).await?),
			}
		};
		drop(surplus);

		tracing::debug!(%key, listener = id, "presence.subscribe");
		(listener.on_presence)(&presence);
		(listener.on_typing)(&typing);
		Ok(PresenceSubscription {
			inner: Arc::downgrade(&self.inner),
			key: key.clone(),
			id: Some(id),
		})
	}

	async fn open_feed(&self, key: &ResourceKey) -> Result<ScopedSubscription, PresenceError> {
		let weak = Arc::downgrade(&self.inner);
		let handler: MessageHandler = Arc::new(move |message| {
			if let Some(inner) = weak.upgrade() {
				inner.ingest(message);
			}
		});
		let id = self.inner.channel.subscribe(&Topic::presence(key), handler).await?;
		tracing::debug!(%key, subscription = id.0, "presence.feed.opened");
		Ok(ScopedSubscription::new(Arc::clone(&self.inner.channel), id))
	}

	async fn publish(&self, message: PresenceMessage) -> Result<(), PresenceError> {
		let topic = Topic::presence(message.key());
		let value = serde_json::to_value(&message)?;
		self.inner.channel.publish(&topic, value).await?;
		Ok(())
	}

	/// Live presence set on `key`.
	pub fn presence(&self, key: &ResourceKey) -> Vec<PresenceRecord> {
		self.inner.state.lock().table.presence(key)
	}

	/// Live typing set on `key`.
	pub fn typing(&self, key: &ResourceKey) -> Vec<TypingRecord> {
		self.inner.state.lock().table.typing(key)
	}

	/// Expires records against the current clock. Returns how many were removed.
	pub fn sweep(&self) -> usize {
		self.inner.sweep_at(self.inner.clock.now())
	}

	pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
		self.inner.sweep_at(now)
	}

	/// Runs [`Self::sweep`] every `sweep_interval_ms` until the handle is dropped.
	pub fn spawn_sweeper(&self) -> SweeperHandle {
		let cancel = CancellationToken::new();
		let weak = Arc::downgrade(&self.inner);
		let task = tandem_worker::every(TaskClass::Maintenance, self.inner.config.sweep_interval(), cancel.clone(), move || {
			if let Some(inner) = weak.upgrade() {
				inner.sweep_at(inner.clock.now());
			}
		});
		SweeperHandle { cancel, task }
	}
}

/// Live presence subscription. Dropping it detaches the callbacks.
pub struct PresenceSubscription {
	inner: Weak<Inner>,
	key: ResourceKey,
	id: Option<usize>,
}

impl PresenceSubscription {
	pub fn key(&self) -> &ResourceKey {
		&self.key
	}

	/// Detaches now, awaiting the channel unsubscribe if this was the last
	/// subscriber of the resource.
	pub async fn release(mut self) -> Result<(), PresenceError> {
		let scoped = self.detach();
		if let Some(scoped) = scoped {
			scoped.release().await?;
		}
		Ok(())
	}

	fn detach(&mut self) -> Option<ScopedSubscription> {
		let id = self.id.take()?;
		self.inner.upgrade()?.detach(&self.key, id)
	}
}

impl Drop for PresenceSubscription {
	fn drop(&mut self) {
		drop(self.detach());
	}
}

/// Background sweeper. Cancelled when dropped.
#[derive(Debug)]
pub struct SweeperHandle {
	cancel: CancellationToken,
	task: JoinHandle<()>,
}

impl SweeperHandle {
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}
}

impl Drop for SweeperHandle {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}
