//! Structured logging schema for notekeep.
//!
//! `tracing` field names are identifiers at the call site, so this module
//! documents them rather than exporting constants. Every event carries the
//! identity fields; the rest appear where they apply.
//!
//! ## Fields
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `subsystem` | Originating subsystem: `storage`, `db`, `admin` |
//! | `component` | Component within the subsystem: `lifecycle`, `reconciler`, `blob_store`, `pool` |
//! | `op` | Operation: `upload`, `soft_delete`, `restore`, `purge`, `purge_expired`, `reconcile` |
//! | `request_id` | Correlation ID from `RequestContext` |
//! | `user_id` | Owner of the quota ledger |
//! | `note_id` | Note owning the attachment |
//! | `attachment_id` | Attachment being operated on |
//! | `blob_key` | Blob store key |
//! | `size_bytes` | Size of the attachment involved |
//! | `used_bytes` | Ledger usage after the operation |
//! | `duration_ms` | Wall-clock duration |
//! | `error`, `error_kind` | Failure message and stable [`crate::ErrorKind`] code |
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue: orphaned blob, ledger drift, skipped purge |
//! | INFO  | Completed lifecycle transitions, reconcile results |
//! | DEBUG | Decision points: admission checks, classification |
