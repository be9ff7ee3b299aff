//! Filename canonicalization for extracted video frames.
//!
//! Frames are named after their position in the video (`12.png`), with
//! supplemental crops of the same moment named `12.1.png` or `12-2.png`.
//! This module turns those names into comparable token sequences, derives the
//! shared base key, and decides which archive entries are worth processing.

use std::cmp::Ordering;

/// Image extensions accepted for processing.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// File names written by operating systems that never contain frames.
const PLATFORM_FILES: &[&str] = &[".ds_store", "thumbs.db", "desktop.ini"];

/// A single run of a tokenized filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A run of ASCII digits, stored with leading zeros stripped so that
    /// arbitrarily long runs still compare by value.
    Number(String),
    /// A run of anything else, lower-cased.
    Text(String),
}

impl Token {
    fn number(digits: &str) -> Self {
        let trimmed = digits.trim_start_matches('0');
        if trimmed.is_empty() {
            Token::Number("0".to_string())
        } else {
            Token::Number(trimmed.to_string())
        }
    }
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Token::Number(a), Token::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Token::Number(_), Token::Text(_)) => Ordering::Less,
            (Token::Text(_), Token::Number(_)) => Ordering::Greater,
            (Token::Text(a), Token::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Returns the last path component of an archive entry name.
pub fn file_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Returns the file name without its final extension.
pub fn stem(name: &str) -> &str {
    let name = file_name(name);
    match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    }
}

fn extension(name: &str) -> Option<String> {
    let name = file_name(name);
    match name.rfind('.') {
        Some(pos) if pos > 0 => Some(name[pos + 1..].to_ascii_lowercase()),
        _ => None,
    }
}

/// Splits a filename (extension stripped, lower-cased) into alternating
/// digit and non-digit runs.
pub fn tokenize(name: &str) -> Vec<Token> {
    let lowered = stem(name).to_lowercase();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;

    for c in lowered.chars() {
        let is_digit = c.is_ascii_digit();
        if !current.is_empty() && is_digit != in_digits {
            tokens.push(finish_run(&current, in_digits));
            current.clear();
        }
        in_digits = is_digit;
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(finish_run(&current, in_digits));
    }

    tokens
}

fn finish_run(run: &str, digits: bool) -> Token {
    if digits {
        Token::number(run)
    } else {
        Token::Text(run.to_string())
    }
}

/// Natural ordering of two filenames.
///
/// Token sequences are compared position by position; the shorter sequence
/// wins when one is a prefix of the other, so `2` < `2.1` < `10`. Names that
/// tokenize identically (`05.png` and `5.png`) fall back to the raw string.
pub fn compare(a: &str, b: &str) -> Ordering {
    let ta = tokenize(a);
    let tb = tokenize(b);
    ta.cmp(&tb).then_with(|| a.cmp(b))
}

/// Sorts names in place using [`compare`].
pub fn sort_natural<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by(|a, b| compare(a.as_ref(), b.as_ref()));
}

/// The grouping key shared by a primary frame and its variants.
///
/// `05.png`, `5.1.png` and `5-2.png` all map to `"5"`; a name without a
/// leading number keeps its stem.
pub fn base_key(name: &str) -> String {
    let stem = stem(name);
    let digits: &str = {
        let end = stem
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(stem.len());
        &stem[..end]
    };

    if digits.is_empty() {
        return stem.to_string();
    }
    match Token::number(digits) {
        Token::Number(n) => n,
        Token::Text(t) => t,
    }
}

/// An archive entry that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessableEntry {
    /// File name component, used as the frame's identity.
    pub base_name: String,
    /// Full entry path inside the archive.
    pub original_name: String,
    /// Whether the frame belongs in the user-facing filtered archive.
    pub include_in_final_archive: bool,
}

/// Why an archive entry was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRejection {
    Directory,
    PlatformMetadata,
    UnsupportedExtension,
    NoLeadingDigits,
}

impl std::fmt::Display for EntryRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            EntryRejection::Directory => "directory",
            EntryRejection::PlatformMetadata => "platform metadata",
            EntryRejection::UnsupportedExtension => "unsupported extension",
            EntryRejection::NoLeadingDigits => "name does not start with a number",
        };
        f.write_str(reason)
    }
}

/// Decides whether an archive entry is a frame worth recognizing.
///
/// Only the bare-number frames (`12.png`) are marked for the final archive;
/// variants (`12.1.png`, `12-1.png`) are still recognized but stay out of it.
pub fn validate_processable_entry(entry_name: &str) -> Result<ProcessableEntry, EntryRejection> {
    if entry_name.ends_with('/') || entry_name.ends_with('\\') {
        return Err(EntryRejection::Directory);
    }

    let normalized = entry_name.replace('\\', "/");
    if normalized
        .split('/')
        .any(|component| component == "__MACOSX" || component.starts_with("._"))
    {
        return Err(EntryRejection::PlatformMetadata);
    }

    let name = file_name(&normalized);
    if name.is_empty() {
        return Err(EntryRejection::Directory);
    }
    if PLATFORM_FILES.contains(&name.to_ascii_lowercase().as_str()) {
        return Err(EntryRejection::PlatformMetadata);
    }

    match extension(name) {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => {}
        _ => return Err(EntryRejection::UnsupportedExtension),
    }

    let stem = stem(name);
    if !stem.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(EntryRejection::NoLeadingDigits);
    }

    Ok(ProcessableEntry {
        base_name: name.to_string(),
        original_name: entry_name.to_string(),
        include_in_final_archive: stem.chars().all(|c| c.is_ascii_digit()),
    })
}
