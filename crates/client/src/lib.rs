//! Collaborative editing client.
//!
//! [`Client`] wires a [`MutationCoordinator`] and a [`PresenceSynchronizer`]
//! to shared remote and channel collaborators, and relays committed writes
//! between participants so every coordinator sees the others' canonical
//! state.
//!
//! [`MutationCoordinator`]: tandem_sync::MutationCoordinator
//! [`PresenceSynchronizer`]: tandem_presence::PresenceSynchronizer

mod bridge;
mod client;
pub mod config;
pub mod error;
pub mod logging;

pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use error::ConfigError;
