//! Storage configuration: upload limits, type allow-lists, and quota policy.

use std::path::PathBuf;

use crate::defaults;
use crate::error::{Error, Result};
use crate::models::{Attachment, AttachmentState, LedgerDelta, TypeCategory};

/// When a soft-deleted attachment stops counting against the user's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuotaPolicy {
    /// Quota is released at soft-delete and re-charged on restore. Purge
    /// leaves the ledger alone.
    #[default]
    ReleaseOnSoftDelete,
    /// Soft-deleted attachments keep consuming quota until purged.
    ReleaseOnPurge,
}

impl QuotaPolicy {
    /// Parse from a config string. Accepts snake_case and kebab-case.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "release_on_soft_delete" | "soft_delete" => Some(Self::ReleaseOnSoftDelete),
            "release_on_purge" | "purge" => Some(Self::ReleaseOnPurge),
            _ => None,
        }
    }

    /// Attachment states whose bytes count against the ledger.
    pub fn counted_states(&self) -> &'static [AttachmentState] {
        match self {
            Self::ReleaseOnSoftDelete => &[AttachmentState::Active],
            Self::ReleaseOnPurge => &[AttachmentState::Active, AttachmentState::SoftDeleted],
        }
    }

    pub fn counts(&self, state: AttachmentState) -> bool {
        self.counted_states().contains(&state)
    }

    /// Ledger change for `attachment` moving into state `to`, if its counted
    /// status flips.
    pub fn delta_for(&self, attachment: &Attachment, to: AttachmentState) -> Option<LedgerDelta> {
        match (self.counts(attachment.state), self.counts(to)) {
            (true, false) => Some(attachment.release()),
            (false, true) => Some(attachment.charge()),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuotaPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReleaseOnSoftDelete => write!(f, "release_on_soft_delete"),
            Self::ReleaseOnPurge => write!(f, "release_on_purge"),
        }
    }
}

/// Limits and classification rules for attachment uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Base directory of the filesystem blob store.
    pub upload_path: PathBuf,
    pub max_image_size: i64,
    pub max_document_size: i64,
    /// Per-user total quota in bytes.
    pub max_user_storage: i64,
    /// Ordered allow-list of image extensions (lower-case, no dot).
    pub allowed_image_types: Vec<String>,
    /// Ordered allow-list of document extensions (lower-case, no dot).
    pub allowed_document_types: Vec<String>,
    pub quota_policy: QuotaPolicy,
    pub purge_retention_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_path: PathBuf::from(defaults::UPLOAD_PATH),
            max_image_size: defaults::MAX_IMAGE_SIZE,
            max_document_size: defaults::MAX_DOCUMENT_SIZE,
            max_user_storage: defaults::MAX_USER_STORAGE,
            allowed_image_types: defaults::ALLOWED_IMAGE_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_document_types: defaults::ALLOWED_DOCUMENT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            quota_policy: QuotaPolicy::default(),
            purge_retention_days: defaults::PURGE_RETENTION_DAYS,
        }
    }
}

impl StorageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables with fallback to defaults.
    ///
    /// Reads `UPLOAD_PATH`, `MAX_IMAGE_SIZE`, `MAX_DOCUMENT_SIZE`,
    /// `MAX_USER_STORAGE`, `ALLOWED_IMAGE_TYPES`, `ALLOWED_DOCUMENT_TYPES`,
    /// `QUOTA_POLICY` and `PURGE_RETENTION_DAYS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`StorageConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("UPLOAD_PATH") {
            if !val.trim().is_empty() {
                config.upload_path = PathBuf::from(val);
            }
        }

        for (key, slot) in [
            ("MAX_IMAGE_SIZE", &mut config.max_image_size),
            ("MAX_DOCUMENT_SIZE", &mut config.max_document_size),
            ("MAX_USER_STORAGE", &mut config.max_user_storage),
        ] {
            if let Some(val) = lookup(key) {
                match val.trim().parse::<i64>() {
                    Ok(n) if n > 0 => *slot = n,
                    _ => tracing::warn!(key, value = %val, "Invalid size limit, using default"),
                }
            }
        }

        if let Some(val) = lookup("ALLOWED_IMAGE_TYPES") {
            let list = parse_extension_list(&val);
            if list.is_empty() {
                tracing::warn!(value = %val, "Empty ALLOWED_IMAGE_TYPES, using default");
            } else {
                config.allowed_image_types = list;
            }
        }

        if let Some(val) = lookup("ALLOWED_DOCUMENT_TYPES") {
            let list = parse_extension_list(&val);
            if list.is_empty() {
                tracing::warn!(value = %val, "Empty ALLOWED_DOCUMENT_TYPES, using default");
            } else {
                config.allowed_document_types = list;
            }
        }

        if let Some(val) = lookup("QUOTA_POLICY") {
            if let Some(policy) = QuotaPolicy::from_str_loose(&val) {
                config.quota_policy = policy;
            } else {
                tracing::warn!(value = %val, "Invalid QUOTA_POLICY, using default");
            }
        }

        if let Some(val) = lookup("PURGE_RETENTION_DAYS") {
            match val.trim().parse::<i64>() {
                Ok(days) if (0..=defaults::MAX_PURGE_RETENTION_DAYS).contains(&days) => {
                    config.purge_retention_days = days
                }
                _ => tracing::warn!(
                    value = %val,
                    max = defaults::MAX_PURGE_RETENTION_DAYS,
                    "Invalid PURGE_RETENTION_DAYS, using default"
                ),
            }
        }

        config
    }

    pub fn upload_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.upload_path = path.into();
        self
    }

    pub fn max_user_storage(mut self, bytes: i64) -> Self {
        self.max_user_storage = bytes;
        self
    }

    pub fn max_image_size(mut self, bytes: i64) -> Self {
        self.max_image_size = bytes;
        self
    }

    pub fn max_document_size(mut self, bytes: i64) -> Self {
        self.max_document_size = bytes;
        self
    }

    pub fn quota_policy(mut self, policy: QuotaPolicy) -> Self {
        self.quota_policy = policy;
        self
    }

    pub fn purge_retention_days(mut self, days: i64) -> Self {
        self.purge_retention_days = days;
        self
    }

    /// Classify a filename by its extension. Images are checked first.
    pub fn classify(&self, filename: &str) -> Option<TypeCategory> {
        let ext = file_extension(filename)?;
        if self.allowed_image_types.iter().any(|t| *t == ext) {
            Some(TypeCategory::Image)
        } else if self.allowed_document_types.iter().any(|t| *t == ext) {
            Some(TypeCategory::Document)
        } else {
            None
        }
    }

    pub fn max_size_for(&self, category: TypeCategory) -> i64 {
        match category {
            TypeCategory::Image => self.max_image_size,
            TypeCategory::Document => self.max_document_size,
        }
    }

    /// Retention window for soft-deleted attachments.
    pub fn purge_retention(&self) -> Result<chrono::Duration> {
        retention_from_days(self.purge_retention_days).map_err(|e| match e {
            Error::InvalidInput(msg) => Error::Config(format!("purge_retention_days: {}", msg)),
            other => other,
        })
    }
}

/// Retention window of `days` days, bounded by
/// [`defaults::MAX_PURGE_RETENTION_DAYS`].
pub fn retention_from_days(days: i64) -> Result<chrono::Duration> {
    if !(0..=defaults::MAX_PURGE_RETENTION_DAYS).contains(&days) {
        return Err(Error::InvalidInput(format!(
            "retention must be between 0 and {} days, got {}",
            defaults::MAX_PURGE_RETENTION_DAYS,
            days
        )));
    }
    chrono::Duration::try_days(days)
        .ok_or_else(|| Error::InvalidInput(format!("retention of {} days out of range", days)))
}

/// Lower-cased extension of `filename` without the dot.
///
/// Dotfiles such as `.bashrc` and names ending in a dot have no extension.
pub fn file_extension(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Parse a comma-separated extension list, tolerating dots and whitespace.
pub fn parse_extension_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeltaDirection;
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn attachment(state: AttachmentState) -> Attachment {
        Attachment {
            id: Uuid::nil(),
            note_id: Uuid::nil(),
            blob_key: "blobs/00/00/x.png".to_string(),
            original_filename: "x.png".to_string(),
            size_bytes: 300,
            category: TypeCategory::Image,
            mime_type: Some("image/png".to_string()),
            content_hash: "blake3:00".to_string(),
            state,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_delta_for_release_on_soft_delete() {
        let policy = QuotaPolicy::ReleaseOnSoftDelete;
        let active = attachment(AttachmentState::Active);
        let deleted = attachment(AttachmentState::SoftDeleted);

        let release = policy.delta_for(&active, AttachmentState::SoftDeleted).unwrap();
        assert_eq!(release.direction, DeltaDirection::Release);
        assert_eq!(release.signed_bytes(), -300);

        let charge = policy.delta_for(&deleted, AttachmentState::Active).unwrap();
        assert_eq!(charge.direction, DeltaDirection::Charge);

        assert!(policy.delta_for(&deleted, AttachmentState::Purged).is_none());
    }

    #[test]
    fn test_delta_for_release_on_purge() {
        let policy = QuotaPolicy::ReleaseOnPurge;
        let active = attachment(AttachmentState::Active);
        let deleted = attachment(AttachmentState::SoftDeleted);

        assert!(policy.delta_for(&active, AttachmentState::SoftDeleted).is_none());
        assert!(policy.delta_for(&deleted, AttachmentState::Active).is_none());
        let release = policy.delta_for(&deleted, AttachmentState::Purged).unwrap();
        assert_eq!(release.direction, DeltaDirection::Release);
    }

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.max_image_size, 10_485_760);
        assert_eq!(config.max_document_size, 52_428_800);
        assert_eq!(config.max_user_storage, 524_288_000);
        assert_eq!(config.quota_policy, QuotaPolicy::ReleaseOnSoftDelete);
        assert_eq!(config.upload_path, PathBuf::from("./uploads"));
    }

    #[test]
    fn test_classify() {
        let config = StorageConfig::default();
        assert_eq!(config.classify("cat.JPG"), Some(TypeCategory::Image));
        assert_eq!(config.classify("a.b.webp"), Some(TypeCategory::Image));
        assert_eq!(config.classify("report.pdf"), Some(TypeCategory::Document));
        assert_eq!(config.classify("sheet.XLSX"), Some(TypeCategory::Document));
        assert_eq!(config.classify("script.sh"), None);
        assert_eq!(config.classify("README"), None);
        assert_eq!(config.classify(".png"), None);
    }

    #[test]
    fn test_max_size_for_category() {
        let config = StorageConfig::default()
            .max_image_size(100)
            .max_document_size(200);
        assert_eq!(config.max_size_for(TypeCategory::Image), 100);
        assert_eq!(config.max_size_for(TypeCategory::Document), 200);
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("photo.PNG"), Some("png".to_string()));
        assert_eq!(file_extension("archive.tar.gz"), Some("gz".to_string()));
        assert_eq!(file_extension("dir.d/file"), None);
        assert_eq!(file_extension("C:\\docs\\memo.docx"), Some("docx".to_string()));
        assert_eq!(file_extension("trailing."), None);
        assert_eq!(file_extension(".hidden"), None);
    }

    #[test]
    fn test_parse_extension_list() {
        assert_eq!(
            parse_extension_list(" .PNG, jpg ,,gif"),
            vec!["png".to_string(), "jpg".to_string(), "gif".to_string()]
        );
        assert!(parse_extension_list(" , ").is_empty());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = StorageConfig::from_lookup(lookup_from(&[
            ("UPLOAD_PATH", "/data/blobs"),
            ("MAX_USER_STORAGE", "1000"),
            ("ALLOWED_IMAGE_TYPES", "png,svg"),
            ("QUOTA_POLICY", "release-on-purge"),
            ("PURGE_RETENTION_DAYS", "7"),
        ]));
        assert_eq!(config.upload_path, PathBuf::from("/data/blobs"));
        assert_eq!(config.max_user_storage, 1000);
        assert_eq!(config.allowed_image_types, vec!["png", "svg"]);
        assert_eq!(config.quota_policy, QuotaPolicy::ReleaseOnPurge);
        assert_eq!(config.purge_retention_days, 7);
        assert_eq!(config.purge_retention().unwrap(), chrono::Duration::days(7));
    }

    #[test]
    fn test_from_lookup_ignores_invalid_values() {
        let config = StorageConfig::from_lookup(lookup_from(&[
            ("MAX_IMAGE_SIZE", "lots"),
            ("MAX_DOCUMENT_SIZE", "-5"),
            ("ALLOWED_DOCUMENT_TYPES", ","),
            ("QUOTA_POLICY", "never"),
            ("PURGE_RETENTION_DAYS", "-1"),
        ]));
        assert_eq!(config, StorageConfig::default());
    }

    #[test]
    fn test_from_lookup_rejects_oversized_retention() {
        for value in ["1000000000000000", "36501", "10000000000"] {
            let config = StorageConfig::from_lookup(lookup_from(&[("PURGE_RETENTION_DAYS", value)]));
            assert_eq!(config.purge_retention_days, defaults::PURGE_RETENTION_DAYS);
            assert!(config.purge_retention().is_ok());
        }

        let config = StorageConfig::from_lookup(lookup_from(&[("PURGE_RETENTION_DAYS", "36500")]));
        assert_eq!(config.purge_retention_days, defaults::MAX_PURGE_RETENTION_DAYS);
    }

    #[test]
    fn test_retention_out_of_range_is_invalid_input() {
        assert_eq!(retention_from_days(0).unwrap(), chrono::Duration::zero());
        assert!(matches!(retention_from_days(-1), Err(Error::InvalidInput(_))));
        assert!(matches!(
            retention_from_days(1_000_000_000_000_000),
            Err(Error::InvalidInput(_))
        ));

        let config = StorageConfig::new().purge_retention_days(i64::MAX);
        assert!(matches!(config.purge_retention(), Err(Error::Config(_))));
    }

    #[test]
    fn test_policy_counted_states() {
        assert!(QuotaPolicy::ReleaseOnSoftDelete.counts(AttachmentState::Active));
        assert!(!QuotaPolicy::ReleaseOnSoftDelete.counts(AttachmentState::SoftDeleted));
        assert!(QuotaPolicy::ReleaseOnPurge.counts(AttachmentState::SoftDeleted));
        assert!(!QuotaPolicy::ReleaseOnPurge.counts(AttachmentState::Purged));
    }

    #[test]
    fn test_policy_parse_and_display() {
        for policy in [QuotaPolicy::ReleaseOnSoftDelete, QuotaPolicy::ReleaseOnPurge] {
            assert_eq!(QuotaPolicy::from_str_loose(&policy.to_string()), Some(policy));
        }
        assert_eq!(QuotaPolicy::from_str_loose("nope"), None);
    }
}
