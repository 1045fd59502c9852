//! Helpers for the string locations stored on folder and file records.
//!
//! Locations always use `/` as separator, whether they are local absolute
//! paths or object-store keys.

use std::path::{Component, Path};

use crate::core::error::{AppError, Result};

/// Join a child name onto a folder location
pub fn join_location(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

/// Location of the folder containing `location`
pub fn parent_location(location: &str) -> Option<&str> {
    let trimmed = location.trim_end_matches('/');
    trimmed.rfind('/').map(|idx| &trimmed[..idx])
}

/// Separator-normalized form used for comparisons
pub fn normalize_location(location: &str) -> String {
    let replaced = location.replace('\\', "/");
    let trimmed = replaced.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Rewrite `path` when it equals `old_prefix` or lies below it.
///
/// The match is bounded by `/`, so `/x/A` never matches `/x/AB`.
pub fn replace_prefix(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    let old_prefix = old_prefix.trim_end_matches('/');
    let new_prefix = new_prefix.trim_end_matches('/');

    if path == old_prefix {
        return Some(new_prefix.to_string());
    }

    path.strip_prefix(old_prefix)
        .filter(|rest| rest.starts_with('/'))
        .map(|rest| format!("{}{}", new_prefix, rest))
}

/// `~` or `~user`, as a shell would expand it
fn is_home_shortcut(component: &str) -> bool {
    component.strip_prefix('~').is_some_and(|user| {
        user.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    })
}

/// Reject source paths that climb out of their directory or use home shortcuts
pub fn ensure_safe_source_path(path: &Path) -> Result<()> {
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(AppError::Security(format!(
            "Path '{}' contains a parent directory reference",
            path.display()
        )));
    }

    // Only a leading component expands; "/srv/~archive" is an ordinary directory
    if let Some(Component::Normal(first)) = path.components().next() {
        if is_home_shortcut(&first.to_string_lossy()) {
            return Err(AppError::Security(format!(
                "Path '{}' uses a home directory shortcut",
                path.display()
            )));
        }
    }

    // Catch encodings the component parser does not split, e.g. "a\..\b" on unix
    let raw = path.to_string_lossy();
    if raw.split(['/', '\\']).any(|part| part == "..") {
        return Err(AppError::Security(format!(
            "Path '{}' contains a parent directory reference",
            raw
        )));
    }

    Ok(())
}

/// File name without its final extension
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Final extension of a file name, without the dot
pub fn file_extension(name: &str) -> Option<&str> {
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}
