//! Committed-mutation fan-out between participants.
//!
//! Outbound, every commit of the local coordinator is published on
//! `mutations/<type>`. Inbound, notices from other actors are installed with
//! [`MutationCoordinator::apply_remote`]; the local actor's own echoes are
//! dropped.

use std::sync::Arc;

use tandem_channel::{Channel, ChannelError, MessageHandler, ScopedSubscription, Topic};
use tandem_primitives::{ActorId, ResourceType};
use tandem_sync::{CommittedMutation, MutationCoordinator, RemoteApply};
use tandem_worker::{CancellationToken, TaskClass};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Live bridge. Dropping it stops forwarding and releases the subscriptions.
pub(crate) struct CommitBridge {
	subscriptions: Vec<ScopedSubscription>,
	cancel: CancellationToken,
}

impl CommitBridge {
	pub(crate) async fn connect(channel: Arc<dyn Channel>, coordinator: MutationCoordinator, actor: ActorId) -> Result<Self, ChannelError> {
		let mut subscriptions = Vec::with_capacity(ResourceType::ALL.len());
		for kind in ResourceType::ALL {
			let handler = inbound_handler(coordinator.clone(), actor.clone());
			let id = channel.subscribe(&Topic::mutations(kind), handler).await?;
			subscriptions.push(ScopedSubscription::new(Arc::clone(&channel), id));
		}

		let cancel = CancellationToken::new();
		let commits = coordinator.subscribe_commits();
		tandem_worker::spawn(TaskClass::Channel, forward(channel, commits, cancel.clone()));
		tracing::debug!(%actor, "client.bridge.connected");
		Ok(Self { subscriptions, cancel })
	}

	/// Stops forwarding and awaits every unsubscribe.
	pub(crate) async fn close(mut self) -> Result<(), ChannelError> {
		self.cancel.cancel();
		for subscription in std::mem::take(&mut self.subscriptions) {
			subscription.release().await?;
		}
		Ok(())
	}
}

impl Drop for CommitBridge {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

fn inbound_handler(coordinator: MutationCoordinator, actor: ActorId) -> MessageHandler {
	Arc::new(move |message| {
		let notice: CommittedMutation = match serde_json::from_value(message.clone()) {
			Ok(notice) => notice,
			Err(error) => {
				tracing::debug!(%error, "client.bridge.malformed");
				return;
			}
		};
		if notice.actor == actor {
			return;
		}
		let key = notice.key.clone();
		let version = notice.version.clone();
		let outcome = coordinator.apply_remote(notice);
		if outcome != RemoteApply::Ignored {
			tracing::trace!(%key, %version, ?outcome, "client.bridge.received");
		}
	})
}

async fn forward(channel: Arc<dyn Channel>, mut commits: broadcast::Receiver<CommittedMutation>, cancel: CancellationToken) {
	loop {
		let notice = tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			received = commits.recv() => match received {
				Ok(notice) => notice,
				Err(RecvError::Lagged(skipped)) => {
					tracing::warn!(skipped, "client.bridge.lagged");
					continue;
				}
				Err(RecvError::Closed) => break,
			},
		};

		let topic = Topic::mutations(notice.key.kind);
		let message = match serde_json::to_value(&notice) {
			Ok(message) => message,
			Err(error) => {
				tracing::warn!(key = %notice.key, %error, "client.bridge.encode_failed");
				continue;
			}
		};
		if let Err(error) = channel.publish(&topic, message).await {
			tracing::warn!(key = %notice.key, %error, "client.bridge.publish_failed");
		}
	}
	tracing::debug!("client.bridge.stopped");
}
