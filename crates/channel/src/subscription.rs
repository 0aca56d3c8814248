use std::sync::Arc;

use tandem_worker::TaskClass;

use crate::{Channel, ChannelError, SubscriptionId};

/// Subscription that is released when dropped.
///
/// Drop spawns the unsubscribe on the worker runtime; call [`Self::release`]
/// to await it and observe failures.
pub struct ScopedSubscription {
	channel: Arc<dyn Channel>,
	id: Option<SubscriptionId>,
}

impl ScopedSubscription {
	pub fn new(channel: Arc<dyn Channel>, id: SubscriptionId) -> Self {
		Self { channel, id: Some(id) }
	}

	pub fn id(&self) -> Option<SubscriptionId> {
		self.id
	}

	/// Unsubscribes immediately.
	pub async fn release(mut self) -> Result<(), ChannelError> {
		match self.id.take() {
			Some(id) => self.channel.unsubscribe(id).await,
			None => Ok(()),
		}
	}
}

impl Drop for ScopedSubscription {
	fn drop(&mut self) {
		let Some(id) = self.id.take() else {
			return;
		};
		let channel = Arc::clone(&self.channel);
		tandem_worker::spawn(TaskClass::Channel, async move {
			if let Err(error) = channel.unsubscribe(id).await {
				tracing::debug!(id = id.0, %error, "channel.unsubscribe_on_drop_failed");
			}
		});
	}
}
