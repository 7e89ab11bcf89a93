//! Fleet-wide spoke directory.
//!
//! Hubs sharing a backend see each other's spokes through
//! [`DistributedStore`]. Writes are not transactional: a crash between the
//! record write and the index updates leaves a stale index entry until the
//! record expires.

pub mod backend;
pub mod directory;
pub mod error;
pub mod sqlite;

pub use {
    backend::{KvBackend, MemoryBackend},
    directory::{DEFAULT_KEY_PREFIX, DEFAULT_OP_TIMEOUT, DEFAULT_SPOKE_TTL, DistributedStore, StoreConfig},
    error::{Error, Result},
    sqlite::SqliteBackend,
};
