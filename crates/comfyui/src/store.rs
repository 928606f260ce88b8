//! The [`ArtifactStore`] seam between job orchestration and the remote engine.
//!
//! [`ComfyUIApi`] is the production implementation; tests substitute
//! scripted stores to drive the poll loop without a network.

use std::future::Future;

use serde_json::Value;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::job::{ArtifactReference, JobHandle, JobStatus, RawArtifact};

/// Remote engine operations needed to run one generation job.
pub trait ArtifactStore: Send + Sync {
    /// Queue a job document and return its handle.
    fn submit(&self, workflow: &Value)
        -> impl Future<Output = Result<JobHandle, ComfyUIApiError>> + Send;

    /// Check where a job stands.
    fn query_status(
        &self,
        handle: &JobHandle,
        output_node_id: &str,
    ) -> impl Future<Output = Result<JobStatus, ComfyUIApiError>> + Send;

    /// Download a finished artifact.
    fn fetch_artifact(
        &self,
        reference: &ArtifactReference,
    ) -> impl Future<Output = Result<RawArtifact, ComfyUIApiError>> + Send;
}

impl ArtifactStore for ComfyUIApi {
    async fn submit(&self, workflow: &Value) -> Result<JobHandle, ComfyUIApiError> {
        self.submit_workflow(workflow).await
    }

    async fn query_status(
        &self,
        handle: &JobHandle,
        output_node_id: &str,
    ) -> Result<JobStatus, ComfyUIApiError> {
        ComfyUIApi::query_status(self, handle, output_node_id).await
    }

    async fn fetch_artifact(
        &self,
        reference: &ArtifactReference,
    ) -> Result<RawArtifact, ComfyUIApiError> {
        ComfyUIApi::fetch_artifact(self, reference).await
    }
}
