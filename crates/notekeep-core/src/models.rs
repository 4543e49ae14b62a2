//! Core data models for attachments and storage quotas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// REQUEST CONTEXT
// =============================================================================

/// Authenticated caller identity, produced by the auth layer and passed
/// explicitly into every user-facing engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Uuid,
    /// Correlation ID for logs.
    pub request_id: Uuid,
}

impl RequestContext {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            request_id: Uuid::now_v7(),
        }
    }

    pub fn with_request_id(user_id: Uuid, request_id: Uuid) -> Self {
        Self {
            user_id,
            request_id,
        }
    }
}

// =============================================================================
// ATTACHMENT TYPES
// =============================================================================

/// Declared type category of an attachment, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeCategory {
    Image,
    Document,
}

impl std::fmt::Display for TypeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Document => write!(f, "document"),
        }
    }
}

impl std::str::FromStr for TypeCategory {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "document" => Ok(Self::Document),
            _ => Err(format!("Invalid type category: {}", s)),
        }
    }
}

/// Lifecycle state of an attachment.
///
/// `Purged` never appears on a stored row: purging removes the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentState {
    #[default]
    Active,
    SoftDeleted,
    Purged,
}

impl std::fmt::Display for AttachmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::SoftDeleted => write!(f, "soft_deleted"),
            Self::Purged => write!(f, "purged"),
        }
    }
}

impl std::str::FromStr for AttachmentState {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "soft_deleted" => Ok(Self::SoftDeleted),
            "purged" => Ok(Self::Purged),
            _ => Err(format!("Invalid attachment state: {}", s)),
        }
    }
}

/// Events that drive the attachment state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    SoftDelete,
    Restore,
    Purge,
}

impl LifecycleEvent {
    /// The state an attachment must be in for this event to apply.
    pub fn required_state(&self) -> AttachmentState {
        match self {
            Self::SoftDelete => AttachmentState::Active,
            Self::Restore | Self::Purge => AttachmentState::SoftDeleted,
        }
    }
}

impl AttachmentState {
    /// Apply a lifecycle event, returning the next state.
    ///
    /// | From        | Event      | To          |
    /// |-------------|------------|-------------|
    /// | Active      | SoftDelete | SoftDeleted |
    /// | SoftDeleted | Restore    | Active      |
    /// | SoftDeleted | Purge      | Purged      |
    pub fn transition(self, id: Uuid, event: LifecycleEvent) -> Result<AttachmentState> {
        match (self, event) {
            (Self::Active, LifecycleEvent::SoftDelete) => Ok(Self::SoftDeleted),
            (Self::SoftDeleted, LifecycleEvent::Restore) => Ok(Self::Active),
            (Self::SoftDeleted, LifecycleEvent::Purge) => Ok(Self::Purged),
            (found, event) => Err(Error::InvalidState {
                id,
                expected: event.required_state(),
                found: Some(found),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Purged)
    }
}

/// A file bound to one note, tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub note_id: Uuid,
    /// Blob store key. Internal, never serialized to clients.
    #[serde(skip_serializing, default)]
    pub blob_key: String,
    pub original_filename: String,
    pub size_bytes: i64,
    pub category: TypeCategory,
    pub mime_type: Option<String>,
    pub content_hash: String,
    pub state: AttachmentState,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Attachment {
    /// Ledger change this attachment contributes when it starts being counted.
    pub fn charge(&self) -> LedgerDelta {
        LedgerDelta::charge(self.size_bytes, self.category)
    }

    /// Ledger change this attachment contributes when it stops being counted.
    pub fn release(&self) -> LedgerDelta {
        LedgerDelta::release(self.size_bytes, self.category)
    }
}

/// Raw upload as handed over by the request layer.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadRequest {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: None,
            data,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn size_bytes(&self) -> i64 {
        self.data.len() as i64
    }
}

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub purged: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

// =============================================================================
// QUOTA LEDGER
// =============================================================================

/// Whether a ledger change adds or removes one counted attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaDirection {
    Charge,
    Release,
}

/// A single attachment entering or leaving the counted set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerDelta {
    pub size_bytes: i64,
    pub category: TypeCategory,
    pub direction: DeltaDirection,
}

impl LedgerDelta {
    pub fn charge(size_bytes: i64, category: TypeCategory) -> Self {
        Self {
            size_bytes,
            category,
            direction: DeltaDirection::Charge,
        }
    }

    pub fn release(size_bytes: i64, category: TypeCategory) -> Self {
        Self {
            size_bytes,
            category,
            direction: DeltaDirection::Release,
        }
    }

    /// Signed byte change.
    pub fn signed_bytes(&self) -> i64 {
        match self.direction {
            DeltaDirection::Charge => self.size_bytes,
            DeltaDirection::Release => -self.size_bytes,
        }
    }
}

/// Per-user aggregate of counted attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLedger {
    pub user_id: Uuid,
    pub used_bytes: i64,
    pub file_count: i32,
    pub image_count: i32,
    pub document_count: i32,
    pub updated_at: DateTime<Utc>,
}

impl QuotaLedger {
    /// A zeroed ledger, as created alongside a new account.
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            used_bytes: 0,
            file_count: 0,
            image_count: 0,
            document_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// Whether `candidate_bytes` more would still fit under `limit_bytes`.
    pub fn admits(&self, candidate_bytes: i64, limit_bytes: i64) -> bool {
        match self.used_bytes.checked_add(candidate_bytes) {
            Some(total) => total <= limit_bytes,
            None => false,
        }
    }

    /// Bytes still available under `limit_bytes`, never negative.
    pub fn remaining(&self, limit_bytes: i64) -> i64 {
        (limit_bytes - self.used_bytes).max(0)
    }

    /// Apply a delta in place. Every counter is clamped at zero.
    pub fn apply(&mut self, delta: LedgerDelta) {
        self.used_bytes = self.used_bytes.saturating_add(delta.signed_bytes()).max(0);
        let step = match delta.direction {
            DeltaDirection::Charge => 1,
            DeltaDirection::Release => -1,
        };
        self.file_count = (self.file_count + step).max(0);
        match delta.category {
            TypeCategory::Image => self.image_count = (self.image_count + step).max(0),
            TypeCategory::Document => self.document_count = (self.document_count + step).max(0),
        }
        self.updated_at = Utc::now();
    }

    /// True when byte and count totals match, ignoring `updated_at`.
    pub fn same_totals(&self, other: &QuotaLedger) -> bool {
        self.used_bytes == other.used_bytes
            && self.file_count == other.file_count
            && self.image_count == other.image_count
            && self.document_count == other.document_count
    }
}
