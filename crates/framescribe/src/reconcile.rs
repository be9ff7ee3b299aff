//! Turns raw batch output into frame rows.
//!
//! Every output line is matched back to its crop through the custom id.
//! The service may reorder lines, so order is restored from the index
//! embedded in the id, never from line position.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::batch::{BatchError, CustomId, EMPTY_SENTINEL};
use crate::canonical;
use crate::db::frame_repo::FrameRow;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Batch output has {actual} lines, expected {expected}")]
    LineCountMismatch { expected: u32, actual: usize },

    #[error("Batch output line {line} is not valid JSON: {reason}")]
    InvalidLine { line: usize, reason: String },

    #[error("Batch output contains no usable subtitle text")]
    NoUsableFrames,

    #[error(transparent)]
    Batch(#[from] BatchError),
}

#[derive(Debug, Deserialize)]
struct OutputLine {
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    error: Option<LineError>,
    #[serde(default)]
    response: Option<LineResponse>,
}

#[derive(Debug, Deserialize)]
struct LineError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl LineError {
    fn is_set(&self) -> bool {
        self.message.is_some() || self.code.as_ref().is_some_and(|c| !c.is_null())
    }

    fn describe(&self) -> String {
        match (&self.message, &self.code) {
            (Some(message), _) => message.clone(),
            (None, Some(code)) => format!("error code {}", code),
            (None, None) => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LineResponse {
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    body: Option<ResponseBody>,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<LineError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<MessageContent>,
}

/// Message content is either a plain string or a list of typed parts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl MessageContent {
    /// Concatenated text of the content; non-text parts are ignored.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Other => None,
                })
                .collect(),
        }
    }
}

/// Result of reconciling one output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Frames with text, ordered by index.
    pub frames: Vec<FrameRow>,
    /// Lines whose custom id did not belong to this job.
    pub foreign_lines: usize,
    /// Crops the model reported as having no subtitle.
    pub empty_frames: usize,
}

/// Parses a batch output file for `job_id`.
///
/// The number of non-blank lines must equal `expected_lines`. Any line-level
/// error fails the whole file.
pub fn parse_output(
    job_id: &str,
    raw: &[u8],
    expected_lines: u32,
) -> Result<Reconciled, ReconcileError> {
    let text = String::from_utf8_lossy(raw);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() != expected_lines as usize {
        return Err(ReconcileError::LineCountMismatch {
            expected: expected_lines,
            actual: lines.len(),
        });
    }

    let mut by_index: BTreeMap<u32, FrameRow> = BTreeMap::new();
    let mut foreign_lines = 0;
    let mut empty_frames = 0;

    for (n, line) in lines.iter().enumerate() {
        let parsed: OutputLine =
            serde_json::from_str(line).map_err(|e| ReconcileError::InvalidLine {
                line: n + 1,
                reason: e.to_string(),
            })?;

        let raw_id = parsed.custom_id.clone().unwrap_or_default();
        if let Some(err) = line_failure(&parsed) {
            return Err(BatchError::LineFailed {
                custom_id: raw_id,
                message: err,
            }
            .into());
        }

        let Some(id) = CustomId::parse(&raw_id).filter(|id| id.job_id == job_id) else {
            debug!("Skipping output line {} with foreign id '{}'", n + 1, raw_id);
            foreign_lines += 1;
            continue;
        };

        let content = first_content(&parsed);
        let trimmed = content.trim();
        if trimmed.is_empty() || trimmed == EMPTY_SENTINEL {
            empty_frames += 1;
            continue;
        }

        by_index.entry(id.index).or_insert_with(|| FrameRow {
            job_id: job_id.to_string(),
            base_key: canonical::base_key(&id.filename),
            filename: id.filename,
            index: id.index,
            text: trimmed.to_string(),
        });
    }

    if by_index.is_empty() {
        return Err(ReconcileError::NoUsableFrames);
    }

    Ok(Reconciled {
        frames: by_index.into_values().collect(),
        foreign_lines,
        empty_frames,
    })
}

fn line_failure(line: &OutputLine) -> Option<String> {
    if let Some(err) = line.error.as_ref().filter(|e| e.is_set()) {
        return Some(err.describe());
    }
    let response = line.response.as_ref()?;
    if let Some(err) = response
        .body
        .as_ref()
        .and_then(|b| b.error.as_ref())
        .filter(|e| e.is_set())
    {
        return Some(err.describe());
    }
    match response.status_code {
        Some(code) if !(200..300).contains(&code) => Some(format!("HTTP status {}", code)),
        _ => None,
    }
}

fn first_content(line: &OutputLine) -> String {
    line.response
        .as_ref()
        .and_then(|r| r.body.as_ref())
        .and_then(|b| b.choices.first())
        .and_then(|c| c.message.content.as_ref())
        .map(MessageContent::text)
        .unwrap_or_default()
}
