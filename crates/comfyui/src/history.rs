//! Interpretation of `GET /history/{prompt_id}` responses.
//!
//! ComfyUI answers with an object keyed by prompt ID. The key is absent
//! until the job has been registered and finished at least once:
//!
//! ```json
//! {
//!   "abc123": {
//!     "status": { "status_str": "success", "completed": true, "messages": [] },
//!     "outputs": {
//!       "9": { "images": [{ "filename": "out.png", "subfolder": "", "type": "output" }] }
//!     }
//!   }
//! }
//! ```

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::job::{ArtifactReference, JobHandle, JobStatus};

/// One prompt's entry in the history map.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: Option<HistoryStatus>,
    #[serde(default)]
    pub outputs: HashMap<String, NodeOutput>,
}

/// Execution status block of a history entry.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub status_str: Option<String>,
}

/// Output produced by a single node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<Value>,
}

/// Errors interpreting a history response.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The entry for the prompt did not have the expected shape.
    #[error("Malformed history entry for prompt {prompt_id}: {source}")]
    Malformed {
        prompt_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// The job completed but the output node produced no image.
    #[error("Prompt {prompt_id} completed without an image on output node '{node_id}'")]
    MissingOutput { prompt_id: String, node_id: String },
}

/// Derive the status of `handle` from a history response body.
///
/// * key absent -> [`JobStatus::NotFound`]
/// * `status.completed == true` -> [`JobStatus::Completed`] with the first
///   image of `output_node_id`
/// * anything else -> [`JobStatus::Pending`]
pub fn job_status(
    body: &Value,
    handle: &JobHandle,
    output_node_id: &str,
) -> Result<JobStatus, HistoryError> {
    let Some(raw_entry) = body.get(handle.as_str()) else {
        return Ok(JobStatus::NotFound);
    };

    let entry: HistoryEntry =
        serde_json::from_value(raw_entry.clone()).map_err(|source| HistoryError::Malformed {
            prompt_id: handle.to_string(),
            source,
        })?;

    let completed = entry.status.as_ref().is_some_and(|s| s.completed);
    if !completed {
        if let Some(status_str) = entry.status.as_ref().and_then(|s| s.status_str.as_deref()) {
            tracing::debug!(prompt_id = %handle, status_str, "Job not completed yet");
        }
        return Ok(JobStatus::Pending);
    }

    entry
        .outputs
        .get(output_node_id)
        .and_then(|output| output.images.first())
        .and_then(ArtifactReference::from_json)
        .map(JobStatus::Completed)
        .ok_or_else(|| HistoryError::MissingOutput {
            prompt_id: handle.to_string(),
            node_id: output_node_id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn handle() -> JobHandle {
        JobHandle::new("abc123")
    }

    #[test]
    fn absent_handle_is_not_found() {
        let body = json!({ "other": { "status": { "completed": true } } });
        assert_eq!(job_status(&body, &handle(), "9").unwrap(), JobStatus::NotFound);
    }

    #[test]
    fn empty_history_is_not_found() {
        assert_eq!(job_status(&json!({}), &handle(), "9").unwrap(), JobStatus::NotFound);
    }

    #[test]
    fn incomplete_entry_is_pending() {
        let body = json!({
            "abc123": { "status": { "status_str": "running", "completed": false }, "outputs": {} }
        });
        assert_eq!(job_status(&body, &handle(), "9").unwrap(), JobStatus::Pending);
    }

    #[test]
    fn entry_without_status_is_pending() {
        let body = json!({ "abc123": { "outputs": {} } });
        assert_eq!(job_status(&body, &handle(), "9").unwrap(), JobStatus::Pending);
    }

    #[test]
    fn errored_entry_is_still_pending() {
        let body = json!({
            "abc123": { "status": { "status_str": "error", "completed": false }, "outputs": {} }
        });
        assert_eq!(job_status(&body, &handle(), "9").unwrap(), JobStatus::Pending);
    }

    #[test]
    fn completed_entry_yields_first_image_of_output_node() {
        let body = json!({
            "abc123": {
                "status": { "status_str": "success", "completed": true },
                "outputs": {
                    "7": { "images": [{ "filename": "preview.png", "subfolder": "", "type": "temp" }] },
                    "9": { "images": [
                        { "filename": "out.png", "subfolder": "", "type": "output" },
                        { "filename": "out_2.png", "subfolder": "", "type": "output" }
                    ] }
                }
            }
        });

        let status = job_status(&body, &handle(), "9").unwrap();
        assert_matches!(status, JobStatus::Completed(reference) => {
            assert_eq!(reference.filename(), Some("out.png"));
            assert_eq!(reference.get("type"), Some("output"));
        });
    }

    #[test]
    fn completed_without_output_node_is_error() {
        let body = json!({
            "abc123": { "status": { "completed": true }, "outputs": { "7": { "images": [] } } }
        });
        assert_matches!(
            job_status(&body, &handle(), "9"),
            Err(HistoryError::MissingOutput { node_id, .. }) if node_id == "9"
        );
    }

    #[test]
    fn non_object_entry_is_malformed() {
        let body = json!({ "abc123": "queued" });
        assert_matches!(
            job_status(&body, &handle(), "9"),
            Err(HistoryError::Malformed { .. })
        );
    }
}
