use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{Channel, ChannelError, MessageHandler, SubscriptionId, Topic};

struct Subscriber {
	topic: Topic,
	handler: MessageHandler,
}

/// In-process channel shared by every participant holding the same hub.
///
/// Handlers run synchronously on the publishing task, after the hub's lock
/// has been released, so a handler may publish or unsubscribe re-entrantly.
#[derive(Default)]
pub struct MemoryHub {
	subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
	next_id: AtomicU64,
	closed: AtomicBool,
}

impl MemoryHub {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of live subscriptions on `topic`.
	pub fn subscriber_count(&self, topic: &Topic) -> usize {
		self.subscribers.lock().values().filter(|sub| &sub.topic == topic).count()
	}

	/// Rejects all further operations with [`ChannelError::Closed`].
	pub fn close(&self) {
		self.closed.store(true, Ordering::Release);
		self.subscribers.lock().clear();
	}

	fn ensure_open(&self) -> Result<(), ChannelError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(ChannelError::Closed);
		}
		Ok(())
	}
}

#[async_trait]
impl Channel for MemoryHub {
	async fn subscribe(&self, topic: &Topic, handler: MessageHandler) -> Result<SubscriptionId, ChannelError> {
		self.ensure_open()?;
		let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
		self.subscribers.lock().insert(id, Subscriber { topic: topic.clone(), handler });
		tracing::trace!(topic = %topic, id = id.0, "channel.subscribe");
		Ok(id)
	}

	async fn publish(&self, topic: &Topic, message: Value) -> Result<(), ChannelError> {
		self.ensure_open()?;
		let handlers: Vec<MessageHandler> = self
			.subscribers
			.lock()
			.values()
			.filter(|sub| &sub.topic == topic)
			.map(|sub| sub.handler.clone())
			.collect();

		tracing::trace!(topic = %topic, receivers = handlers.len(), "channel.publish");
		for handler in handlers {
			handler(&message);
		}
		Ok(())
	}

	async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChannelError> {
		self.ensure_open()?;
		match self.subscribers.lock().remove(&id) {
			Some(sub) => {
				tracing::trace!(topic = %sub.topic, id = id.0, "channel.unsubscribe");
				Ok(())
			}
			None => Err(ChannelError::UnknownSubscription(id)),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use serde_json::json;

	use super::*;

	fn recorder() -> (Arc<Mutex<Vec<Value>>>, MessageHandler) {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		let handler: MessageHandler = Arc::new(move |msg: &Value| sink.lock().push(msg.clone()));
		(seen, handler)
	}

	#[tokio::test]
	async fn publish_reaches_only_matching_topic() {
		let hub = MemoryHub::new();
		let (a_seen, a) = recorder();
		let (b_seen, b) = recorder();
		hub.subscribe(&Topic::new("a"), a).await.unwrap();
		hub.subscribe(&Topic::new("b"), b).await.unwrap();

		hub.publish(&Topic::new("a"), json!({"n": 1})).await.unwrap();

		assert_eq!(a_seen.lock().as_slice(), &[json!({"n": 1})]);
		assert!(b_seen.lock().is_empty());
	}

	#[tokio::test]
	async fn unsubscribe_stops_delivery_and_rejects_repeat() {
		let hub = MemoryHub::new();
		let topic = Topic::new("t");
		let (seen, handler) = recorder();
		let id = hub.subscribe(&topic, handler).await.unwrap();
		assert_eq!(hub.subscriber_count(&topic), 1);

		hub.unsubscribe(id).await.unwrap();
		hub.publish(&topic, json!(1)).await.unwrap();

		assert!(seen.lock().is_empty());
		assert_eq!(hub.subscriber_count(&topic), 0);
		assert!(matches!(hub.unsubscribe(id).await, Err(ChannelError::UnknownSubscription(_))));
	}

	#[tokio::test]
	async fn closed_hub_rejects_operations() {
		let hub = MemoryHub::new();
		hub.close();
		assert!(matches!(hub.publish(&Topic::new("t"), json!(null)).await, Err(ChannelError::Closed)));
	}
}
