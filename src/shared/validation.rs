use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Regex for validating folder and file display names
    /// Any characters except path separators, reserved punctuation and control characters,
    /// without leading or trailing whitespace
    /// - Valid: "Holiday 2024", "report.final.pdf", "Default"
    /// - Invalid: "a/b", "a\\b", " padded", "what?", ""
    pub static ref ENTRY_NAME_REGEX: Regex =
        Regex::new(r#"^[^\s/\\:*?"<>|\x00-\x1f](?:[^/\\:*?"<>|\x00-\x1f]*[^\s/\\:*?"<>|\x00-\x1f])?$"#)
            .unwrap();
}

/// Maximum length of a folder or file display name
pub const MAX_ENTRY_NAME_LEN: usize = 255;

/// Check a folder or file display name
pub fn is_valid_entry_name(name: &str) -> bool {
    name.len() <= MAX_ENTRY_NAME_LEN
        && name != "."
        && name != ".."
        && ENTRY_NAME_REGEX.is_match(name)
}

/// Normalize user supplied tags: trimmed, lowercased, deduplicated, empty ones dropped
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    normalized
}
