//! Broadcast channel abstraction.
//!
//! Presence and committed-mutation fan-out both ride on a [`Channel`]: an
//! addressable set of [`Topic`]s carrying JSON messages. Delivery is
//! at-most-once and unordered across topics; publishers receive their own
//! messages back and are expected to filter them.

mod error;
mod memory;
mod subscription;
mod topic;

use std::sync::Arc;

use async_trait::async_trait;
pub use error::ChannelError;
pub use memory::MemoryHub;
use serde_json::Value;
pub use subscription::ScopedSubscription;
pub use topic::Topic;

/// Callback receiving each message published on a subscribed topic.
pub type MessageHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifier returned by [`Channel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Pub/sub transport.
#[async_trait]
pub trait Channel: Send + Sync {
	/// Registers `handler` for every message published on `topic`.
	async fn subscribe(&self, topic: &Topic, handler: MessageHandler) -> Result<SubscriptionId, ChannelError>;

	/// Publishes `message` to every current subscriber of `topic`.
	async fn publish(&self, topic: &Topic, message: Value) -> Result<(), ChannelError>;

	/// Removes a subscription. Unknown ids are reported as errors.
	async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChannelError>;
}
