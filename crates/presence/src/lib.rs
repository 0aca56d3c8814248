//! Ephemeral presence and typing indicators.
//!
//! Each participant runs a [`PresenceSynchronizer`] bound to its identity. It
//! announces who is viewing or editing a resource, renews those records with
//! heartbeats, and mirrors what other participants publish on the resource's
//! presence topic. Records that are not renewed within the TTL are swept; the
//! only other way a record disappears is an explicit withdraw.

mod config;
mod error;
mod message;
mod record;
mod synchronizer;
mod table;

pub use config::PresenceConfig;
pub use error::PresenceError;
pub use message::PresenceMessage;
pub use record::{PresenceRecord, PresenceType, TypingRecord};
pub use synchronizer::{PresenceCallback, PresenceSubscription, PresenceSynchronizer, SweeperHandle, TypingCallback};
