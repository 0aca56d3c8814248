use tandem_channel::ChannelError;
use tandem_primitives::ResourceKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PresenceError {
	#[error("presence channel: {0}")]
	Channel(#[from] ChannelError),

	#[error("failed to encode presence message: {0}")]
	Encode(#[from] serde_json::Error),

	/// Heartbeat for a resource without a live local record.
	#[error("no presence announced on {0}")]
	NotAnnounced(ResourceKey),
}
