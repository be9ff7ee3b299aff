//! In-memory stand-in for the batch completion service.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use framescribe::batch::{BatchError, BatchInfo, BatchService, BatchStatus, CustomId};

#[derive(Debug, Clone)]
pub struct CreatedBatch {
    pub batch_id: String,
    pub input_file_id: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Default)]
struct State {
    manifests: HashMap<String, (String, Vec<u8>)>,
    batches: Vec<CreatedBatch>,
    polls: HashMap<String, u32>,
    downloads: u32,
}

/// Answers every crop from a filename → text table.
///
/// Batches report `in_progress` for the first `polls_before_done` polls,
/// then `final_status`. Output lines come back in reverse manifest order.
pub struct FakeBatchService {
    state: Mutex<State>,
    answers: Mutex<HashMap<String, String>>,
    failing_filename: Mutex<Option<String>>,
    polls_before_done: u32,
    final_status: String,
    omit_output: bool,
}

impl FakeBatchService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            answers: Mutex::new(HashMap::new()),
            failing_filename: Mutex::new(None),
            polls_before_done: 0,
            final_status: "completed".to_string(),
            omit_output: false,
        }
    }

    pub fn with_answer(self, filename: &str, text: &str) -> Self {
        self.set_answer(filename, text);
        self
    }

    pub fn ready_after(mut self, polls: u32) -> Self {
        self.polls_before_done = polls;
        self
    }

    pub fn ending_with(mut self, status: &str) -> Self {
        self.final_status = status.to_string();
        self
    }

    pub fn without_output(mut self) -> Self {
        self.omit_output = true;
        self
    }

    pub fn set_answer(&self, filename: &str, text: &str) {
        self.answers
            .lock()
            .unwrap()
            .insert(filename.to_string(), text.to_string());
    }

    /// Makes the output line for `filename` carry a line-level error.
    pub fn fail_line(&self, filename: Option<&str>) {
        *self.failing_filename.lock().unwrap() = filename.map(str::to_string);
    }

    pub fn uploads(&self) -> usize {
        self.state.lock().unwrap().manifests.len()
    }

    pub fn batches(&self) -> Vec<CreatedBatch> {
        self.state.lock().unwrap().batches.clone()
    }

    pub fn total_polls(&self) -> u32 {
        self.state.lock().unwrap().polls.values().sum()
    }

    pub fn downloads(&self) -> u32 {
        self.state.lock().unwrap().downloads
    }

    /// Manifest lines of the most recent upload.
    pub fn last_manifest(&self) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        let Some(batch) = state.batches.last() else {
            return Vec::new();
        };
        let (_, content) = &state.manifests[&batch.input_file_id];
        String::from_utf8_lossy(content)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn output_line(&self, custom_id: &str) -> Value {
        let filename = CustomId::parse(custom_id)
            .map(|id| id.filename)
            .unwrap_or_default();

        if self.failing_filename.lock().unwrap().as_deref() == Some(filename.as_str()) {
            return json!({
                "id": format!("resp-{}", custom_id),
                "custom_id": custom_id,
                "response": null,
                "error": {"code": "server_error", "message": "model overloaded"},
            });
        }

        let text = self
            .answers
            .lock()
            .unwrap()
            .get(&filename)
            .cloned()
            .unwrap_or_else(|| "<EMPTY>".to_string());
        json!({
            "id": format!("resp-{}", custom_id),
            "custom_id": custom_id,
            "response": {
                "status_code": 200,
                "body": {
                    "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}]
                }
            },
            "error": null,
        })
    }
}

#[async_trait]
impl BatchService for FakeBatchService {
    async fn upload_manifest(&self, filename: &str, content: Vec<u8>) -> Result<String, BatchError> {
        let mut state = self.state.lock().unwrap();
        let id = format!("file-{}", state.manifests.len() + 1);
        state
            .manifests
            .insert(id.clone(), (filename.to_string(), content));
        Ok(id)
    }

    async fn create_batch(
        &self,
        input_file_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<BatchInfo, BatchError> {
        let mut state = self.state.lock().unwrap();
        if !state.manifests.contains_key(input_file_id) {
            return Err(BatchError::Api {
                status: 404,
                body: format!("no file {}", input_file_id),
            });
        }
        let batch_id = format!("batch-{}", state.batches.len() + 1);
        state.batches.push(CreatedBatch {
            batch_id: batch_id.clone(),
            input_file_id: input_file_id.to_string(),
            metadata: metadata.clone(),
        });
        Ok(BatchInfo {
            id: batch_id,
            status: BatchStatus::Validating,
            output_file_id: None,
            error_file_id: None,
        })
    }

    async fn get_batch(&self, batch_id: &str) -> Result<BatchInfo, BatchError> {
        let mut state = self.state.lock().unwrap();
        if !state.batches.iter().any(|b| b.batch_id == batch_id) {
            return Err(BatchError::Api {
                status: 404,
                body: format!("no batch {}", batch_id),
            });
        }
        let polls = state.polls.entry(batch_id.to_string()).or_insert(0);
        *polls += 1;

        let status = if *polls <= self.polls_before_done {
            BatchStatus::InProgress
        } else {
            BatchStatus::from_api(&self.final_status)
        };
        let output_file_id = (status == BatchStatus::Completed && !self.omit_output)
            .then(|| format!("out-{}", batch_id));

        Ok(BatchInfo {
            id: batch_id.to_string(),
            status,
            output_file_id,
            error_file_id: None,
        })
    }

    async fn download_output(&self, file_id: &str) -> Result<Vec<u8>, BatchError> {
        let manifest = {
            let mut state = self.state.lock().unwrap();
            state.downloads += 1;
            let batch_id = file_id.strip_prefix("out-").unwrap_or(file_id);
            let batch = state
                .batches
                .iter()
                .find(|b| b.batch_id == batch_id)
                .cloned()
                .ok_or_else(|| BatchError::Api {
                    status: 404,
                    body: format!("no output {}", file_id),
                })?;
            state.manifests[&batch.input_file_id].1.clone()
        };

        let mut lines: Vec<String> = String::from_utf8_lossy(&manifest)
            .lines()
            .map(|l| {
                let request: Value = serde_json::from_str(l).unwrap();
                let custom_id = request["custom_id"].as_str().unwrap_or_default();
                self.output_line(custom_id).to_string()
            })
            .collect();
        lines.reverse();

        let mut out = lines.join("\n");
        out.push('\n');
        Ok(out.into_bytes())
    }
}
