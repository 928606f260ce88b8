//! ComfyUI job template and prompt binding.
//!
//! The template is a workflow in ComfyUI "API format": an object keyed
//! by node ID, where each node carries `class_type` and `inputs`:
//!
//! ```json
//! {
//!   "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "a cat", "clip": ["4", 1] } },
//!   "9": { "class_type": "SaveImage", "inputs": { "images": ["8", 0] } }
//! }
//! ```
//!
//! A [`JobTemplate`] is loaded once and shared read-only. Binding a
//! prompt always produces a fresh document, so concurrent requests never
//! observe each other's edits.

use std::path::Path;

use serde_json::Value;

use crate::error::CoreError;

/// Input name that receives the prompt text on text-encoder nodes.
pub const PROMPT_INPUT_NAME: &str = "text";

/// Location of the prompt field inside a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBinding {
    pub node_id: String,
    pub input_name: String,
}

impl PromptBinding {
    /// Bind to the `text` input of the given node.
    pub fn text_input(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            input_name: PROMPT_INPUT_NAME.to_string(),
        }
    }
}

/// Read-only workflow document used as the basis for every job.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    document: Value,
}

impl JobTemplate {
    /// Wrap an already-parsed workflow. The document must be a JSON object.
    pub fn from_value(document: Value) -> Result<Self, CoreError> {
        if !document.is_object() {
            return Err(CoreError::Config(
                "Workflow JSON must be an object keyed by node ID".to_string(),
            ));
        }
        Ok(Self { document })
    }

    /// Read and parse a workflow file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        let document = serde_json::from_str(&raw).map_err(|e| CoreError::json(path, e))?;
        let template = Self::from_value(document)?;
        tracing::debug!(
            path = %path.display(),
            nodes = template.node_count(),
            "Loaded workflow template",
        );
        Ok(template)
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn node_count(&self) -> usize {
        self.document.as_object().map_or(0, |obj| obj.len())
    }

    pub fn has_node(&self, node_id: &str) -> bool {
        self.document.get(node_id).is_some()
    }

    /// Produce a job document with `text` written into the bound field.
    ///
    /// The template itself is never modified. Fails with
    /// [`CoreError::Config`] if the node is missing or has no `inputs`
    /// object.
    pub fn bind(&self, binding: &PromptBinding, text: &str) -> Result<Value, CoreError> {
        let mut document = self.document.clone();

        let node = document.get_mut(&binding.node_id).ok_or_else(|| {
            CoreError::Config(format!(
                "Prompt node '{}' not found in workflow",
                binding.node_id
            ))
        })?;

        let inputs = node
            .get_mut("inputs")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                CoreError::Config(format!(
                    "Prompt node '{}' has no 'inputs' object",
                    binding.node_id
                ))
            })?;

        inputs.insert(binding.input_name.clone(), Value::String(text.to_string()));
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn sample_workflow() -> Value {
        json!({
            "3": {
                "class_type": "KSampler",
                "inputs": { "seed": 42, "steps": 20, "positive": ["6", 0] }
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "placeholder", "clip": ["4", 1] }
            },
            "9": {
                "class_type": "SaveImage",
                "inputs": { "images": ["8", 0], "filename_prefix": "ComfyUI" }
            }
        })
    }

    #[test]
    fn bind_replaces_only_the_prompt_field() {
        let template = JobTemplate::from_value(sample_workflow()).unwrap();
        let bound = template
            .bind(&PromptBinding::text_input("6"), "a lighthouse at dusk")
            .unwrap();

        let mut expected = sample_workflow();
        expected["6"]["inputs"]["text"] = json!("a lighthouse at dusk");
        assert_eq!(bound, expected);
    }

    #[test]
    fn bind_leaves_template_untouched() {
        let template = JobTemplate::from_value(sample_workflow()).unwrap();
        template
            .bind(&PromptBinding::text_input("6"), "first")
            .unwrap();
        let second = template
            .bind(&PromptBinding::text_input("6"), "second")
            .unwrap();

        assert_eq!(template.document(), &sample_workflow());
        assert_eq!(second["6"]["inputs"]["text"], "second");
    }

    #[test]
    fn bind_inserts_text_when_node_lacks_it() {
        let template = JobTemplate::from_value(json!({
            "45": { "class_type": "TextEncodeZImage", "inputs": {} }
        }))
        .unwrap();
        let bound = template
            .bind(&PromptBinding::text_input("45"), "hello")
            .unwrap();
        assert_eq!(bound["45"]["inputs"]["text"], "hello");
    }

    #[test]
    fn bind_missing_node_is_config_error() {
        let template = JobTemplate::from_value(sample_workflow()).unwrap();
        let err = template
            .bind(&PromptBinding::text_input("404"), "text")
            .unwrap_err();
        assert_matches!(err, CoreError::Config(msg) if msg.contains("'404'"));
    }

    #[test]
    fn bind_node_without_inputs_is_config_error() {
        let template = JobTemplate::from_value(json!({ "6": { "class_type": "Note" } })).unwrap();
        assert_matches!(
            template.bind(&PromptBinding::text_input("6"), "text"),
            Err(CoreError::Config(_))
        );
    }

    #[test]
    fn non_object_document_is_rejected() {
        assert_matches!(
            JobTemplate::from_value(json!([1, 2, 3])),
            Err(CoreError::Config(_))
        );
    }

    #[test]
    fn load_reads_workflow_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", sample_workflow()).unwrap();

        let template = JobTemplate::load(file.path()).unwrap();
        assert_eq!(template.node_count(), 3);
        assert!(template.has_node("9"));
        assert!(!template.has_node("10"));
    }

    #[test]
    fn load_reports_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert_matches!(JobTemplate::load(file.path()), Err(CoreError::Json { .. }));
    }

    #[test]
    fn load_reports_missing_file() {
        assert_matches!(
            JobTemplate::load(Path::new("/definitely/not/here.json")),
            Err(CoreError::Io { .. })
        );
    }
}
