//! Shared vocabulary for the collaborative editing client: resource keys, field
//! payloads, edit operations, version markers, identities and clocks.

/// Wall-clock abstraction used for operation and presence timestamps.
pub mod clock;
/// Field payloads carried by resources and operations.
pub mod fields;
/// Identifier newtypes.
pub mod ids;
/// Actor identity as supplied by the identity provider.
pub mod identity;
/// Edit intents submitted against a single resource.
pub mod operation;
/// Resource typing and addressing.
pub mod resource;
/// Canonical version markers.
pub mod version;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fields::Fields;
pub use identity::{Identity, IdentityProvider};
pub use ids::{ActorId, OperationId, ResourceId};
pub use operation::{Operation, OperationKind, POSITION_FIELD};
pub use resource::{ResourceKey, ResourceType};
pub use version::VersionMarker;
