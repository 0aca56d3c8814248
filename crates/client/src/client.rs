use std::sync::Arc;

use tandem_channel::{Channel, ChannelError};
use tandem_presence::{PresenceError, PresenceRecord, PresenceSubscription, PresenceSynchronizer, PresenceType, SweeperHandle, TypingRecord};
use tandem_primitives::{Clock, Fields, Identity, Operation, ResourceKey, SystemClock, VersionMarker};
use tandem_sync::{
	AllowAll, ConflictId, ConflictRecord, MutationCoordinator, RemoteStore, Resolution, SubmitGate, SyncError, Ticket,
};

use crate::bridge::CommitBridge;
use crate::config::ClientConfig;

/// Builder for [`Client`].
pub struct ClientBuilder {
	remote: Arc<dyn RemoteStore>,
	channel: Arc<dyn Channel>,
	identity: Identity,
	config: ClientConfig,
	clock: Arc<dyn Clock>,
	gate: Arc<dyn SubmitGate>,
	sweeper: bool,
}

impl ClientBuilder {
	pub fn config(mut self, config: ClientConfig) -> Self {
		self.config = config;
		self
	}

	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	pub fn gate(mut self, gate: Arc<dyn SubmitGate>) -> Self {
		self.gate = gate;
		self
	}

	/// Whether to run the background presence sweeper. On by default.
	pub fn sweeper(mut self, enabled: bool) -> Self {
		self.sweeper = enabled;
		self
	}

	/// Builds the client and joins the commit broadcast.
	pub async fn connect(self) -> Result<Client, ChannelError> {
		let coordinator = MutationCoordinator::builder(self.remote)
			.config(self.config.sync.clone())
			.clock(Arc::clone(&self.clock))
			.gate(self.gate)
			.build();
		let presence = PresenceSynchronizer::with_clock(Arc::clone(&self.channel), self.identity.clone(), self.config.presence.clone(), Arc::clone(&self.clock));
		let bridge = CommitBridge::connect(self.channel, coordinator.clone(), self.identity.actor.clone()).await?;
		let sweeper = self.sweeper.then(|| presence.spawn_sweeper());

		tracing::info!(actor = %self.identity.actor, "client.connected");
		Ok(Client {
			identity: self.identity,
			clock: self.clock,
			coordinator,
			presence,
			bridge: Some(bridge),
			_sweeper: sweeper,
		})
	}
}

/// One participant: local mutations, conflicts, undo history and presence.
pub struct Client {
	identity: Identity,
	clock: Arc<dyn Clock>,
	coordinator: MutationCoordinator,
	presence: PresenceSynchronizer,
	bridge: Option<CommitBridge>,
	_sweeper: Option<SweeperHandle>,
}

impl Client {
	pub fn builder(remote: Arc<dyn RemoteStore>, channel: Arc<dyn Channel>, identity: Identity) -> ClientBuilder {
		ClientBuilder {
			remote,
			channel,
			identity,
			config: ClientConfig::default(),
			clock: Arc::new(SystemClock),
			gate: Arc::new(AllowAll),
			sweeper: true,
		}
	}

	pub fn identity(&self) -> &Identity {
		&self.identity
	}

	pub fn coordinator(&self) -> &MutationCoordinator {
		&self.coordinator
	}

	pub fn presence(&self) -> &PresenceSynchronizer {
		&self.presence
	}

	pub fn create(&self, key: ResourceKey, payload: Fields) -> Operation {
		Operation::create(key, self.identity.actor.clone(), payload, self.clock.now())
	}

	pub fn update(&self, key: ResourceKey, payload: Fields) -> Operation {
		Operation::update(key, self.identity.actor.clone(), payload, self.clock.now())
	}

	pub fn delete(&self, key: ResourceKey) -> Operation {
		Operation::delete(key, self.identity.actor.clone(), self.clock.now())
	}

	pub fn reorder(&self, key: ResourceKey, position: u64) -> Operation {
		Operation::reorder(key, self.identity.actor.clone(), position, self.clock.now())
	}

	pub fn submit(&self, op: Operation) -> Ticket {
		self.coordinator.submit(op)
	}

	pub fn submit_batch(&self, ops: Vec<Operation>) -> Ticket {
		self.coordinator.submit_batch(ops)
	}

	pub fn undo(&self) -> bool {
		self.coordinator.undo()
	}

	pub fn redo(&self) -> bool {
		self.coordinator.redo()
	}

	pub fn can_undo(&self) -> bool {
		self.coordinator.can_undo()
	}

	pub fn can_redo(&self) -> bool {
		self.coordinator.can_redo()
	}

	pub fn get_conflicts(&self) -> Vec<ConflictRecord> {
		self.coordinator.get_conflicts()
	}

	pub fn resolve_conflict(&self, id: ConflictId, resolution: Resolution) -> Ticket {
		self.coordinator.resolve_conflict(id, resolution)
	}

	pub fn clear_conflicts(&self) -> usize {
		self.coordinator.clear_conflicts()
	}

	/// Installs canonical data fetched out of band.
	pub fn hydrate(&self, key: ResourceKey, value: Fields, version: VersionMarker) -> Result<(), SyncError> {
		self.coordinator.hydrate(key, value, version)
	}

	pub fn get(&self, key: &ResourceKey) -> Option<Fields> {
		self.coordinator.get(key)
	}

	pub async fn subscribe_presence(
		&self,
		key: &ResourceKey,
		on_presence: impl Fn(&[PresenceRecord]) + Send + Sync + 'static,
		on_typing: impl Fn(&[TypingRecord]) + Send + Sync + 'static,
	) -> Result<PresenceSubscription, PresenceError> {
		self.presence.subscribe(key, on_presence, on_typing).await
	}

	pub async fn announce(&self, key: &ResourceKey, presence_type: PresenceType, field: Option<&str>) -> Result<PresenceRecord, PresenceError> {
		self.presence.announce(key, presence_type, field).await
	}

	pub async fn withdraw(&self, key: &ResourceKey) -> Result<(), PresenceError> {
		self.presence.withdraw(key).await
	}

	pub async fn heartbeat(&self, key: &ResourceKey) -> Result<bool, PresenceError> {
		self.presence.heartbeat(key).await
	}

	pub async fn set_typing(&self, key: &ResourceKey, field: &str, is_typing: bool) -> Result<TypingRecord, PresenceError> {
		self.presence.set_typing(key, field, is_typing).await
	}

	/// Leaves the commit broadcast, awaiting the unsubscribes. Local state
	/// stays usable but no longer hears about other participants' commits.
	pub async fn disconnect(&mut self) -> Result<(), ChannelError> {
		match self.bridge.take() {
			Some(bridge) => bridge.close().await,
			None => Ok(()),
		}
	}
}
