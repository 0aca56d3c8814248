use thiserror::Error;

use crate::SubscriptionId;

/// Channel transport failures.
#[derive(Debug, Error)]
pub enum ChannelError {
	#[error("channel closed")]
	Closed,

	#[error("unknown subscription {0:?}")]
	UnknownSubscription(SubscriptionId),

	#[error("failed to encode message: {0}")]
	Encode(#[from] serde_json::Error),

	#[error("transport error: {0}")]
	Transport(String),
}
