//! Correlation key attached to every batch request.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

// Lazy first group: job ids never contain "-frame-", file names might.
static RE_CUSTOM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^job-(.+?)-frame-(\d+)-(.+)$").unwrap());

/// Identifies one crop inside one job: `job-<jobId>-frame-<index>-<filename>`.
///
/// Both index and file name travel with the request so results can be
/// matched back even when the service reorders or re-delivers lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomId {
    pub job_id: String,
    pub index: u32,
    pub filename: String,
}

impl CustomId {
    pub fn new(job_id: &str, index: u32, filename: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            index,
            filename: filename.to_string(),
        }
    }

    /// Decodes a key produced by `Display`. Returns `None` for anything else.
    pub fn parse(value: &str) -> Option<Self> {
        let caps = RE_CUSTOM_ID.captures(value)?;
        let index = caps.get(2)?.as_str().parse().ok()?;
        Some(Self {
            job_id: caps.get(1)?.as_str().to_string(),
            index,
            filename: caps.get(3)?.as_str().to_string(),
        })
    }
}

impl fmt::Display for CustomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}-frame-{}-{}", self.job_id, self.index, self.filename)
    }
}
