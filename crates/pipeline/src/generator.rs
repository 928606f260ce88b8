//! End-to-end orchestration of one image generation request.
//!
//! `bind -> submit -> poll -> fetch -> transcode -> report`. Every step's
//! failure is folded into a [`GenerationReport::Failure`]; callers never
//! see a raw error.

use std::sync::Arc;

use comfy_mcp_comfyui::api::{artifact_link, ComfyUIApiError};
use comfy_mcp_comfyui::history::HistoryError;
use comfy_mcp_comfyui::events::{GenerationEvent, ProgressSink};
use comfy_mcp_comfyui::poller::{poll_until_complete, PollConfig, PollOutcome, Sleeper, TokioSleeper};
use comfy_mcp_comfyui::store::ArtifactStore;
use comfy_mcp_core::config::GeneratorConfig;
use comfy_mcp_core::naming::local_now;
use comfy_mcp_core::template::{JobTemplate, PromptBinding};

use crate::report::{FailureKind, GenerationReport, SuccessReport};
use crate::transcode::{compression_percent, TranscodeOutcome, Transcoder};

/// Runs generation requests against one remote engine.
///
/// Holds only shared, read-only state, so a single instance can serve
/// concurrent requests.
pub struct Generator<S, Z = TokioSleeper> {
    config: Arc<GeneratorConfig>,
    template: Arc<JobTemplate>,
    store: S,
    sleeper: Z,
    transcoder: Transcoder,
}

impl<S: ArtifactStore> Generator<S, TokioSleeper> {
    pub fn new(config: Arc<GeneratorConfig>, template: Arc<JobTemplate>, store: S) -> Self {
        Self {
            config,
            template,
            store,
            sleeper: TokioSleeper,
            transcoder: Transcoder::default(),
        }
    }
}

impl<S: ArtifactStore, Z: Sleeper> Generator<S, Z> {
    /// Replace the poll-loop sleeper.
    pub fn with_sleeper<Z2: Sleeper>(self, sleeper: Z2) -> Generator<S, Z2> {
        Generator {
            config: self.config,
            template: self.template,
            store: self.store,
            sleeper,
            transcoder: self.transcoder,
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate an image for `prompt` and report the outcome.
    pub async fn generate<P>(&self, prompt: &str, progress: &P) -> GenerationReport
    where
        P: ProgressSink + ?Sized,
    {
        let binding = PromptBinding::text_input(self.config.prompt_node_id.as_str());
        let workflow = match self.template.bind(&binding, prompt) {
            Ok(workflow) => workflow,
            Err(e) => {
                tracing::error!(error = %e, "Failed to bind prompt into workflow");
                return GenerationReport::failure(FailureKind::Config, e);
            }
        };

        let handle = match self.store.submit(&workflow).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "Failed to submit workflow");
                return GenerationReport::failure(FailureKind::Network, e);
            }
        };
        progress.report(GenerationEvent::Submitted {
            handle: handle.clone(),
        });

        let poll = PollConfig::from(self.config.as_ref());
        let reference = match poll_until_complete(
            &self.store,
            &handle,
            &self.config.output_node_id,
            &poll,
            &self.sleeper,
            progress,
        )
        .await
        {
            Ok(PollOutcome::Completed { reference, .. }) => reference,
            Ok(PollOutcome::TimedOut {
                attempts,
                not_found_attempts,
            }) => {
                return GenerationReport::failure(
                    FailureKind::Timeout,
                    format!(
                        "prompt {handle} not completed after {attempts} attempts \
                         ({not_found_attempts} without a history entry)"
                    ),
                );
            }
            Err(e @ ComfyUIApiError::History(HistoryError::MissingOutput { .. })) => {
                tracing::error!(
                    prompt_id = %handle,
                    output_node_id = %self.config.output_node_id,
                    "Output node produced no image",
                );
                return GenerationReport::failure(FailureKind::Config, e);
            }
            Err(e) => {
                tracing::error!(prompt_id = %handle, error = %e, "Polling failed");
                return GenerationReport::failure(FailureKind::Network, e);
            }
        };

        let remote_url = artifact_link(&self.config.comfy_url_external, &reference);

        let raw = match self.store.fetch_artifact(&reference).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(prompt_id = %handle, error = %e, "Failed to fetch image");
                return GenerationReport::failure(FailureKind::Network, e);
            }
        };
        progress.report(GenerationEvent::ImageFetched {
            bytes: raw.size_bytes(),
        });

        let outcome = match self
            .transcoder
            .transcode(&raw, &self.config.local_save_dir, local_now())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist image");
                return GenerationReport::failure(FailureKind::Filesystem, e);
            }
        };

        match &outcome {
            TranscodeOutcome::Transcoded {
                artifact,
                original_bytes,
            } => progress.report(GenerationEvent::Saved {
                path: artifact.path.clone(),
                original_bytes: *original_bytes,
                saved_bytes: artifact.size_bytes(),
                reduction_percent: compression_percent(*original_bytes, artifact.size_bytes()),
            }),
            TranscodeOutcome::FallbackRaw { reason, .. } => {
                progress.report(GenerationEvent::TranscodeFallback {
                    reason: reason.to_string(),
                })
            }
        }

        tracing::info!(
            prompt_id = %handle,
            path = %outcome.artifact().path.display(),
            fallback = outcome.is_fallback(),
            "Image saved",
        );

        GenerationReport::Success(SuccessReport {
            remote_url,
            outcome,
        })
    }
}
