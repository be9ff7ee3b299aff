//! Line-delimited request manifest uploaded to the batch service.

use serde::Serialize;

use super::custom_id::CustomId;
use super::error::BatchError;

/// Reply the model gives when a crop holds no subtitle.
pub const EMPTY_SENTINEL: &str = "<EMPTY>";

pub const COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";

pub const DEFAULT_PROMPT: &str = "Transcribe the subtitle text shown in this image exactly as \
written. Reply with the subtitle text only, without quotes or commentary. If no subtitle is \
visible, reply with <EMPTY>.";

/// A stored crop ready to be referenced from the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropMeta {
    pub index: u32,
    pub filename: String,
    pub key: String,
    pub url: String,
}

/// Model parameters shared by every request in a manifest.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub model: String,
    pub max_tokens: u32,
    pub prompt: String,
}

#[derive(Serialize)]
struct ManifestLine<'a> {
    custom_id: String,
    method: &'static str,
    url: &'static str,
    body: RequestBody<'a>,
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    temperature: u8,
    max_tokens: u32,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: [ContentPart<'a>; 2],
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

/// Renders one JSON line per crop, in the order given.
pub fn build(job_id: &str, crops: &[CropMeta], template: &RequestTemplate) -> Result<Vec<u8>, BatchError> {
    let mut out = Vec::new();
    for crop in crops {
        let line = ManifestLine {
            custom_id: CustomId::new(job_id, crop.index, &crop.filename).to_string(),
            method: "POST",
            url: COMPLETIONS_ENDPOINT,
            body: RequestBody {
                model: &template.model,
                temperature: 0,
                max_tokens: template.max_tokens,
                messages: [Message {
                    role: "user",
                    content: [
                        ContentPart::Text {
                            text: &template.prompt,
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url: &crop.url },
                        },
                    ],
                }],
            },
        };
        serde_json::to_writer(&mut out, &line).map_err(|e| BatchError::Manifest(e.to_string()))?;
        out.push(b'\n');
    }
    Ok(out)
}
