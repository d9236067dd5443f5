//! Storage identifiers and public filenames.

use crate::constants::{FALLBACK_FILENAME, ID_ENTROPY_BYTES, MAX_FILENAME_LEN};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};

/// Hands out unguessable identifiers drawn from the OS CSPRNG.
///
/// Identifiers are base64url without padding, so they need no escaping in
/// a filesystem path or a URL path segment. Uniqueness is probabilistic;
/// callers retry on a collision reported by the store or the backing store.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdAllocator;

impl IdAllocator {
    pub fn allocate(&self) -> String {
        let mut bytes = [0u8; ID_ENTROPY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Whether `name` has the exact shape of an identifier this allocator
    /// hands out.
    pub fn is_allocated(name: &str) -> bool {
        URL_SAFE_NO_PAD
            .decode(name)
            .is_ok_and(|bytes| bytes.len() == ID_ENTROPY_BYTES)
    }
}

/// Reduces a client-supplied filename to a single path component that is
/// also a valid URL path segment as-is.
///
/// Directory parts are dropped, control characters are removed and any
/// other character outside `[A-Za-z0-9._-]` becomes `_`. Names that would
/// resolve to `.` or `..` fall back to a fixed name.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .take(MAX_FILENAME_LEN)
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return FALLBACK_FILENAME.to_string();
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_url_and_path_safe() {
        let id = IdAllocator.allocate();
        assert_eq!(id.len(), 22);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn only_allocator_shaped_names_are_recognized() {
        assert!(IdAllocator::is_allocated(&IdAllocator.allocate()));

        for foreign in ["", ".git", "thesis.pdf", "short", "AAAAAAAAAAAAAAAAAAAAAAAA"] {
            assert!(!IdAllocator::is_allocated(foreign), "{foreign:?}");
        }
        // Right length, wrong alphabet
        assert!(!IdAllocator::is_allocated("AAAAAAAAAAAAAAAAAAAA+/"));
    }

    #[test]
    fn ids_do_not_repeat() {
        let ids: HashSet<String> = (0..10_000).map(|_| IdAllocator.allocate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn filenames_lose_directory_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("holiday photo.jpg"), "holiday_photo.jpg");
        assert_eq!(sanitize_filename("a?b#c%d.txt"), "a_b_c_d.txt");
    }

    #[test]
    fn unusable_filenames_fall_back() {
        assert_eq!(sanitize_filename(""), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename(".."), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("dir/"), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("\u{0}\n"), FALLBACK_FILENAME);
    }

    #[test]
    fn long_and_non_ascii_filenames_are_bounded() {
        let cleaned = sanitize_filename(&"é".repeat(MAX_FILENAME_LEN * 2));
        assert_eq!(cleaned.len(), MAX_FILENAME_LEN);
        assert!(cleaned.chars().all(|c| c == '_'));
    }
}
