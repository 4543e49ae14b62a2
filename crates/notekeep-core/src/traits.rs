//! Core traits for notekeep abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;

use crate::error::Result;

// =============================================================================
// BLOB STORE
// =============================================================================

/// Durable byte storage keyed by a generated path.
///
/// Keys are produced by the caller and never reused, so implementations need
/// no locking of their own.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write data to the specified key, replacing nothing.
    async fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Read data stored under the key.
    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete data stored under the key.
    ///
    /// Returns `Ok(false)` when nothing was stored there.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check if data exists under the key.
    async fn exists(&self, key: &str) -> Result<bool>;
}
