//! Versioned response cache and the network-first strategies built on it.
//!
//! - Entries are response snapshots keyed by request identity, or by path
//!   for API responses (`api-<path>`)
//! - Every entry belongs to a named cache version; stale versions are
//!   evicted as a whole on activation
//! - Strategies serve stale snapshots or synthesized data when the network
//!   is unavailable

mod key;
mod layer;
mod storage;
mod traits;

pub use key::CacheKey;
pub use layer::{CacheLayer, OFFLINE_HEADER};
pub use storage::{Cache, CacheStorage, SqliteStorage};
pub use traits::{CachedResponse, CurrentVersion, ResponseSource, Served};

pub(crate) use storage::parse_datetime;
