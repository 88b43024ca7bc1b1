//! Filename extraction and sanitization for fetched files.
//!
//! Filenames are derived in order of preference from the Content-Disposition
//! header, the URL path, and a deterministic fallback, then sanitized for
//! filesystem safety.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};

use url::Url;

/// Upper bound on stored filename length (common filesystem limit headroom).
const MAX_FILENAME_LEN: usize = 200;

/// Parses a Content-Disposition header to extract a filename.
///
/// Handles:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    // Try filename*= first (RFC 5987 encoded)
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // Format: charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned());
            }
        }
    }

    // Try regular filename=
    if let Some(pos) = header.find("filename=") {
        let value = header[pos + 9..].trim();

        if let Some(stripped) = value.strip_prefix('"') {
            if let Some(end) = stripped.find('"') {
                return Some(stripped[..end].to_string());
            }
        } else {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}

/// Extracts a filename from the last URL path segment, percent-decoded.
pub(crate) fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    if segment.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(segment)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| segment.to_string());
    (!decoded.is_empty()).then_some(decoded)
}

/// Deterministic last-resort filename derived from the URL.
pub(crate) fn fallback_filename(url: &str) -> String {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    format!("download_{:04}.bin", hasher.finish() % 10_000)
}

/// Sanitizes a filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |`) and control characters, and caps the length
/// while preserving the extension.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string();

    if sanitized.chars().count() > MAX_FILENAME_LEN {
        let (stem, ext) = match sanitized.rfind('.') {
            Some(pos) if pos > 0 => (sanitized[..pos].to_string(), sanitized[pos..].to_string()),
            _ => (sanitized.clone(), String::new()),
        };
        let keep = MAX_FILENAME_LEN.saturating_sub(ext.chars().count());
        sanitized = stem.chars().take(keep).collect::<String>() + &ext;
    }

    if sanitized.trim_matches(['_', '.']).is_empty() {
        return "download.bin".to_string();
    }
    sanitized
}

/// Resolves a unique file path under `dir`, adding a numeric suffix if the
/// name is taken.
pub(crate) fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let filename = sanitize_filename(filename);
    let base_path = dir.join(&filename);
    if !base_path.exists() {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };

    for i in 1..1000 {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    // Fallback (extremely unlikely)
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}
