//! # notekeep-core
//!
//! Core types, traits, and abstractions for notekeep's attachment storage.
//!
//! This crate provides the data model (attachments, lifecycle states, quota
//! ledgers), the error taxonomy, upload configuration, and the
//! [`StorageBackend`] trait that blob stores implement.

pub mod config;
pub mod defaults;
pub mod error;
pub mod file_safety;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{file_extension, retention_from_days, QuotaPolicy, StorageConfig};
pub use error::{Error, ErrorKind, Result};
pub use file_safety::{is_valid_mime_type, resolve_mime_type, sanitize_filename};
pub use models::*;
pub use traits::*;
