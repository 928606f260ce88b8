//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the three endpoints a generation needs (workflow submission,
//! history lookup, file download) using [`reqwest`].

use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::history::{self, HistoryError};
use crate::job::{ArtifactReference, JobHandle, JobStatus, RawArtifact};

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, body decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The history response could not be interpreted.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// A URL could not be built from the base URL and artifact fields.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// Create an API client whose requests give up after `timeout`.
    /// `None` leaves requests unbounded.
    pub fn with_timeout(
        api_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, ComfyUIApiError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?, api_url))
    }

    /// Base HTTP API URL (e.g. `http://host:8188`).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with `{"prompt": workflow}`. ComfyUI queues
    /// the job and answers before rendering starts.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<JobHandle, ComfyUIApiError> {
        let body = serde_json::json!({ "prompt": workflow });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        let submitted: SubmitResponse = Self::parse_response(response).await?;
        tracing::info!(
            prompt_id = %submitted.prompt_id,
            queue_number = ?submitted.number,
            "Workflow queued",
        );
        Ok(JobHandle::new(submitted.prompt_id))
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request and returns the raw body.
    pub async fn get_history(
        &self,
        handle: &JobHandle,
    ) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, handle))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Look up the status of a job from its history entry.
    pub async fn query_status(
        &self,
        handle: &JobHandle,
        output_node_id: &str,
    ) -> Result<JobStatus, ComfyUIApiError> {
        let body = self.get_history(handle).await?;
        Ok(history::job_status(&body, handle, output_node_id)?)
    }

    /// Download a rendered file via `GET /view?<fields>`.
    pub async fn fetch_artifact(
        &self,
        reference: &ArtifactReference,
    ) -> Result<RawArtifact, ComfyUIApiError> {
        let url = view_url(&self.api_url, reference)?;
        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;

        tracing::debug!(
            filename = reference.filename().unwrap_or("<unnamed>"),
            bytes = bytes.len(),
            "Fetched artifact",
        );
        Ok(RawArtifact::png(bytes.to_vec()))
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Build the `/view` URL for an artifact on the server at `base_url`.
///
/// Fields are form-urlencoded in their original order.
pub fn view_url(base_url: &str, reference: &ArtifactReference) -> Result<Url, ComfyUIApiError> {
    let raw = format!("{}/view", base_url.trim_end_matches('/'));
    Url::parse_with_params(&raw, reference.pairs()).map_err(|e| ComfyUIApiError::InvalidUrl {
        url: raw,
        reason: e.to_string(),
    })
}

/// User-facing link to an artifact on the server at `base_url`.
///
/// Same as [`view_url`] when `base_url` is absolute; otherwise the base
/// and the encoded query are joined as plain strings.
pub fn artifact_link(base_url: &str, reference: &ArtifactReference) -> String {
    if let Ok(url) = view_url(base_url, reference) {
        return url.to_string();
    }
    let query = Url::parse_with_params("http://localhost/view", reference.pairs())
        .ok()
        .and_then(|url| url.query().map(str::to_owned))
        .unwrap_or_default();
    tracing::debug!(base_url, "External URL is not absolute, joining link as text");
    format!("{}/view?{query}", base_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn reference() -> ArtifactReference {
        ArtifactReference::new([
            ("filename", "my image.png"),
            ("subfolder", ""),
            ("type", "output"),
        ])
    }

    #[test]
    fn view_url_encodes_fields_in_order() {
        let url = view_url("http://comfy.local:8188/", &reference()).unwrap();
        assert_eq!(
            url.as_str(),
            "http://comfy.local:8188/view?filename=my+image.png&subfolder=&type=output"
        );
    }

    #[test]
    fn view_url_rejects_garbage_base() {
        assert_matches!(
            view_url("not a url", &reference()),
            Err(ComfyUIApiError::InvalidUrl { .. })
        );
    }

    #[test]
    fn artifact_link_matches_view_url_for_absolute_base() {
        assert_eq!(
            artifact_link("http://comfy.local:8188", &reference()),
            "http://comfy.local:8188/view?filename=my+image.png&subfolder=&type=output"
        );
    }

    #[test]
    fn artifact_link_joins_host_without_scheme() {
        assert_eq!(
            artifact_link("192.168.1.5:8188/", &reference()),
            "192.168.1.5:8188/view?filename=my+image.png&subfolder=&type=output"
        );
    }

    #[tokio::test]
    async fn submit_posts_prompt_wrapper_and_returns_handle() {
        let server = MockServer::start().await;
        let workflow = json!({ "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "x" } } });

        Mock::given(method("POST"))
            .and(path("/prompt"))
            .and(body_json(json!({ "prompt": workflow.clone() })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "prompt_id": "abc123", "number": 4, "node_errors": {} })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let handle = api.submit_workflow(&workflow).await.unwrap();
        assert_eq!(handle, JobHandle::new("abc123"));
    }

    #[tokio::test]
    async fn submit_surfaces_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid prompt"))
            .mount(&server)
            .await;

        let err = ComfyUIApi::new(server.uri())
            .submit_workflow(&json!({}))
            .await
            .unwrap_err();
        assert_matches!(err, ComfyUIApiError::ApiError { status: 400, body } if body == "invalid prompt");
    }

    #[tokio::test]
    async fn query_status_reads_history_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "abc123": {
                    "status": { "completed": true },
                    "outputs": { "9": { "images": [{ "filename": "out.png", "subfolder": "", "type": "output" }] } }
                }
            })))
            .mount(&server)
            .await;

        let status = ComfyUIApi::new(server.uri())
            .query_status(&JobHandle::new("abc123"), "9")
            .await
            .unwrap();
        assert_matches!(status, JobStatus::Completed(r) if r.filename() == Some("out.png"));
    }

    #[tokio::test]
    async fn fetch_artifact_sends_encoded_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/view"))
            .and(query_param("filename", "my image.png"))
            .and(query_param("type", "output"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let raw = ComfyUIApi::new(server.uri())
            .fetch_artifact(&reference())
            .await
            .unwrap();
        assert_eq!(raw.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn fetch_artifact_missing_file_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/view"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert_matches!(
            ComfyUIApi::new(server.uri()).fetch_artifact(&reference()).await,
            Err(ComfyUIApiError::ApiError { status: 404, .. })
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_request_error() {
        // Port 9 (discard) is essentially never listening on localhost.
        let api = ComfyUIApi::new("http://127.0.0.1:9");
        assert_matches!(
            api.submit_workflow(&json!({})).await,
            Err(ComfyUIApiError::Request(_))
        );
    }
}
