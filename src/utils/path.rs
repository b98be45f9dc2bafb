//! File-name sanitization for received artifacts.

use std::path::{Path, PathBuf};

/// Reduce a (possibly adversarial) peer-supplied name to a single safe
/// file name.
///
/// - Normalizes `\` to `/` and keeps only the last component.
/// - Keeps only alphanumeric chars plus `.`, `-`, `_`, and ` `.
/// - Strips leading dots, so nothing lands as a hidden file or `..`.
/// - Falls back to `"file"` when the result would otherwise be empty.
pub fn safe_file_name(name: &str) -> String {
    let normalized = name.replace('\\', "/");
    let last = normalized
        .split('/')
        .filter(|s| !s.is_empty() && !matches!(*s, "." | ".."))
        .last()
        .unwrap_or("");

    let safe: String = last
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .collect();
    let safe = safe.trim().trim_start_matches('.');

    if safe.is_empty() {
        "file".to_string()
    } else {
        safe.to_string()
    }
}

/// `dir/name`, or `dir/stem (n).ext` for the first `n` that is not taken.
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    (1u32..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
