use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Overall lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
}

/// Last committed pipeline milestone. Declaration order is pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStep {
    Preprocessing,
    BatchSubmitted,
    ResultsSaved,
    DocsBuilt,
}

/// What a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Full run: filtered archive, OCR, text and DOCX.
    Ocr,
    /// Filtered archive and thumbnail only.
    Strip,
}

/// Error returned when parsing one of the job enums from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

macro_rules! text_enum {
    ($ty:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $(t if t == $text.to_ascii_uppercase() => Ok($ty::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $label,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

text_enum!(JobStatus, "status", {
    Pending => "PENDING",
    Processing => "PROCESSING",
    Done => "DONE",
    Error => "ERROR",
});

text_enum!(JobStep, "step", {
    Preprocessing => "PREPROCESSING",
    BatchSubmitted => "BATCH_SUBMITTED",
    ResultsSaved => "RESULTS_SAVED",
    DocsBuilt => "DOCS_BUILT",
});

text_enum!(JobKind, "kind", {
    Ocr => "ocr",
    Strip => "strip",
});

/// One processing run, mirrored one-to-one by a row of the `jobs` table.
///
/// The persisted `step` is the single source of truth for where a run
/// resumes; nothing held in memory survives a step boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub owner_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub step: JobStep,
    pub source_key: String,

    pub total_images: u32,
    pub processed_images: u32,
    pub total_batches: u32,
    pub batches_completed: u32,
    pub submitted_images: u32,

    pub batch_id: Option<String>,
    pub batch_input_id: Option<String>,
    pub batch_output_id: Option<String>,
    pub poll_attempts: u32,
    /// RFC 3339 instant the next poll is due.
    pub wake_at: Option<String>,

    pub images_zip_key: Option<String>,
    pub images_zip_size: Option<u64>,
    pub thumbnail_key: Option<String>,
    pub text_key: Option<String>,
    pub text_size: Option<u64>,
    pub docx_key: Option<String>,
    pub docx_size: Option<u64>,

    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl Job {
    /// A fresh PENDING job positioned at PREPROCESSING.
    pub fn new(owner_id: &str, kind: JobKind, source_key: &str) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            kind,
            status: JobStatus::Pending,
            step: JobStep::Preprocessing,
            source_key: source_key.to_string(),
            total_images: 0,
            processed_images: 0,
            total_batches: 0,
            batches_completed: 0,
            submitted_images: 0,
            batch_id: None,
            batch_input_id: None,
            batch_output_id: None,
            poll_attempts: 0,
            wake_at: None,
            images_zip_key: None,
            images_zip_size: None,
            thumbnail_key: None,
            text_key: None,
            text_size: None,
            docx_key: None,
            docx_size: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == JobStatus::Done
    }

    /// Stamps `updated_at` with the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
    }

    /// Rewinds the job to `step` for a retry.
    ///
    /// State produced at or after `step` is discarded; earlier outputs stay.
    /// Rewinding to BATCH_SUBMITTED keeps the batch identifiers so the same
    /// remote batch is polled again.
    pub fn reset_to(&mut self, step: JobStep) {
        match step {
            JobStep::Preprocessing => {
                self.total_images = 0;
                self.processed_images = 0;
                self.total_batches = 0;
                self.batches_completed = 0;
                self.submitted_images = 0;
                self.batch_id = None;
                self.batch_input_id = None;
                self.batch_output_id = None;
                self.clear_wait();
                self.images_zip_key = None;
                self.images_zip_size = None;
                self.thumbnail_key = None;
                self.clear_documents();
            }
            JobStep::BatchSubmitted => {
                self.batch_output_id = None;
                self.clear_wait();
                self.clear_documents();
            }
            JobStep::ResultsSaved | JobStep::DocsBuilt => {}
        }

        self.step = step;
        self.status = JobStatus::Pending;
        self.error = None;
        self.completed_at = None;
        self.touch();
    }

    pub fn clear_wait(&mut self) {
        self.poll_attempts = 0;
        self.wake_at = None;
    }

    fn clear_documents(&mut self) {
        self.text_key = None;
        self.text_size = None;
        self.docx_key = None;
        self.docx_size = None;
    }
}
