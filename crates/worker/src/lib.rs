//! Task spawning and cancellation primitives shared by the sync engine and the
//! presence synchronizer.
//!
//! Every background task is routed through this crate so that it carries a
//! [`TaskClass`] for tracing and attaches to the active tokio runtime (or a
//! shared fallback runtime when called from outside one).

mod class;
mod scheduled;
mod spawn;
mod token;

pub use class::TaskClass;
pub use scheduled::{ScheduledTask, every, schedule};
pub use spawn::spawn;
pub use token::{GenerationClock, GenerationToken};
pub use tokio_util::sync::CancellationToken;
