//! Hub event fabric.
//!
//! Events are CloudEvents 1.0 envelopes published on `<prefix><type>`
//! channels of a shared [`PubSubBackend`], so every hub process subscribed to
//! a type sees events emitted by every other. When the backend is unreachable
//! events still reach subscribers in the publishing process.

pub mod backend;
pub mod error;
pub mod fabric;
pub mod sqlite;

pub use {
    backend::{EventStream, MemoryPubSub, PubSubBackend},
    error::{Error, Result},
    fabric::{DEFAULT_CHANNEL_PREFIX, DEFAULT_PUBLISH_TIMEOUT, EventFabric, EventHandler, FabricConfig, Subscription},
    sqlite::SqlitePubSub,
};
