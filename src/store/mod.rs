//! Key-value store access.
//!
//! The reaper only needs four operations from the cache: a connectivity
//! probe, cursor-based `SCAN`, `GET` and `DEL`.  [`KeyValueStore`] captures
//! exactly that so the reconciliation loop can run against the KeyDB/Redis
//! pool in production and an in-memory map in tests.

#[cfg(test)]
pub mod memory;
pub mod redis;

use anyhow::Result;

/// One round-trip of a cursor scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next round-trip.  `0` means the scan is complete.
    pub cursor: u64,
    pub keys: Vec<String>,
}

#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Verify the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Run one `SCAN` step starting at `cursor`.
    async fn scan(&self, cursor: u64, pattern: &str, count: u32) -> Result<ScanPage>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete `key`, returning the number of keys removed (0 or 1).
    async fn delete(&self, key: &str) -> Result<u64>;
}
