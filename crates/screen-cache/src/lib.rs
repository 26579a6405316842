//! TTL file cache.
//!
//! One JSON file per key, named by the SHA-256 of the key. Each file holds
//! `{data, timestamp, ttl_hours, key}`. Expiry is checked on read; a
//! corrupt or expired file counts as a miss and is deleted.

pub mod clock;
pub mod manager;

pub use clock::*;
pub use manager::*;
