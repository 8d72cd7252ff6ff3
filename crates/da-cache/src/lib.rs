//! Persistent cache for the deliverables analyzer
//!
//! The cache root holds one directory per named namespace:
//! - Per digest algorithm: `files-{algo}`, `checksums-{algo}`,
//!   `checksums-remote-{algo}`, `rpms-{algo}`
//! - Algorithm independent: `builds`, `builds-remote`
//!
//! ## Storage
//!
//! Each namespace is segmented. Every segment is a single JSON file with a
//! versioned schema header. All segments are preloaded at open and nothing is
//! purged at startup, so unexpired entries survive restarts.
//!
//! ## Expiration
//!
//! Entries expire by lifespan (since insertion) and by max idle (since last
//! access). Expiry is checked on access and at preload; there is no reaper.
//!
//! ## Locking
//!
//! The cache is not shared across processes. An open handle holds an
//! exclusive advisory lock on the root until it is closed.

pub mod clock;
mod error;
mod lock;
mod namespace;
mod topology;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, CacheResult};
pub use lock::{LockError, StoreLock};
pub use namespace::{Namespace, StoreOptions, SEGMENT_SCHEMA_ID, SEGMENT_SCHEMA_VERSION};
pub use topology::{namespace_names, CacheHandle, CacheLease, CacheManager, CacheSettings, CacheTopology, NamespaceKind};

/// Name used when logging cache identity.
pub const BRAND_NAME: &str = "da-cache";

/// Version of this crate, logged with the cache identity.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
