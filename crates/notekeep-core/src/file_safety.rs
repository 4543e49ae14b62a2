//! Filename sanitization and MIME type resolution for uploads.
//!
//! The declared MIME type of an upload is a client claim. Magic bytes win
//! over the claim; a malformed claim is dropped.

use crate::defaults::FILENAME_MAX_LENGTH;

/// Resolve the MIME type to store for an upload.
///
/// 1. Magic byte detection via `infer`.
/// 2. The declared type, if it is a well-formed `type/subtype`.
/// 3. A fixed mapping for the document extensions that carry no magic bytes
///    `infer` recognizes.
pub fn resolve_mime_type(filename: &str, data: &[u8], declared: Option<&str>) -> Option<String> {
    if let Some(kind) = infer::get(data) {
        return Some(kind.mime_type().to_string());
    }

    if let Some(claimed) = declared.map(str::trim).filter(|m| is_valid_mime_type(m)) {
        return Some(claimed.to_lowercase());
    }

    crate::config::file_extension(filename)
        .and_then(|ext| mime_from_extension(&ext))
        .map(str::to_string)
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "pdf" => Some("application/pdf"),
        "doc" => Some("application/msword"),
        "docx" => Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        "xls" => Some("application/vnd.ms-excel"),
        "xlsx" => Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

/// Validate MIME type format per RFC 2045 (type/subtype).
pub fn is_valid_mime_type(mime: &str) -> bool {
    let Some((media_type, subtype)) = mime.split_once('/') else {
        return false;
    };
    if media_type.is_empty() || subtype.is_empty() || subtype.contains('/') {
        return false;
    }
    let is_token_char = |c: char| -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '!' | '#' | '$' | '&' | '-' | '^' | '_' | '.' | '+')
    };
    media_type.chars().all(is_token_char) && subtype.chars().all(is_token_char)
}

/// Sanitize an original filename for storage and display.
///
/// Strips path components, replaces reserved and control characters, and
/// truncates to [`FILENAME_MAX_LENGTH`] bytes keeping the extension.
pub fn sanitize_filename(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let sanitized = sanitized.trim();
    if sanitized.is_empty() {
        return "unnamed_file".to_string();
    }

    if sanitized.len() <= FILENAME_MAX_LENGTH {
        return sanitized.to_string();
    }

    let ext = sanitized
        .rfind('.')
        .map(|pos| &sanitized[pos..])
        .filter(|ext| ext.len() < FILENAME_MAX_LENGTH)
        .unwrap_or("");
    let stem = truncate_at_char_boundary(
        &sanitized[..sanitized.len() - ext.len()],
        FILENAME_MAX_LENGTH - ext.len(),
    );
    format!("{}{}", stem, ext)
}

fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_magic_bytes_override_claim() {
        let mime = resolve_mime_type("image.png", &PNG, Some("text/plain"));
        assert_eq!(mime.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_pdf_magic_bytes() {
        let mime = resolve_mime_type("doc.pdf", b"%PDF-1.4 fake content", None);
        assert_eq!(mime.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn test_declared_type_used_without_magic() {
        let mime = resolve_mime_type("memo.doc", b"plain bytes", Some(" Application/MSWord "));
        assert_eq!(mime.as_deref(), Some("application/msword"));
    }

    #[test]
    fn test_malformed_claim_falls_back_to_extension() {
        let mime = resolve_mime_type("sheet.xls", b"plain bytes", Some("not a mime"));
        assert_eq!(mime.as_deref(), Some("application/vnd.ms-excel"));
    }

    #[test]
    fn test_unknown_everything_is_none() {
        assert_eq!(resolve_mime_type("data.xyz", b"random", None), None);
    }

    #[test]
    fn test_is_valid_mime_type() {
        assert!(is_valid_mime_type("image/png"));
        assert!(is_valid_mime_type("application/vnd.ms-excel"));
        assert!(!is_valid_mime_type("image"));
        assert!(!is_valid_mime_type("image/"));
        assert!(!is_valid_mime_type("a/b/c"));
        assert!(!is_valid_mime_type("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_sanitize_strips_paths() {
        assert_eq!(sanitize_filename("../../etc/passwd.pdf"), "passwd.pdf");
        assert_eq!(sanitize_filename("C:\\Users\\me\\cv.docx"), "cv.docx");
    }

    #[test]
    fn test_sanitize_replaces_reserved_chars() {
        assert_eq!(sanitize_filename("a<b>c?.png"), "a_b_c_.png");
        assert_eq!(sanitize_filename("tab\there.pdf"), "tab_here.pdf");
    }

    #[test]
    fn test_sanitize_empty() {
        assert_eq!(sanitize_filename("   "), "unnamed_file");
        assert_eq!(sanitize_filename("dir/"), "unnamed_file");
    }

    #[test]
    fn test_sanitize_truncates_keeping_extension() {
        let long = format!("{}.pdf", "x".repeat(400));
        let out = sanitize_filename(&long);
        assert_eq!(out.len(), FILENAME_MAX_LENGTH);
        assert!(out.ends_with(".pdf"));
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let long = format!("{}.png", "é".repeat(200));
        let out = sanitize_filename(&long);
        assert!(out.len() <= FILENAME_MAX_LENGTH);
        assert!(out.ends_with(".png"));
    }
}
