//! User-facing outcome of a generation request.
//!
//! Every request ends in exactly one [`GenerationReport`]: a multi-line
//! success summary carrying the saved image, or a single-line failure.

use std::fmt;

use comfy_mcp_comfyui::events::kib;

use crate::transcode::{compression_percent, ArtifactFormat, PersistedArtifact, TranscodeOutcome};

/// Failure line used when the job never completed.
pub const TIMEOUT_FAILURE_MESSAGE: &str = "Failed to generate image. Please check server logs.";

/// Trailing hint appended to success reports.
pub const READ_HINT: &str = "You can read the image from the local path using the Read tool.";

/// Error class of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The prompt could not be bound into the workflow.
    Config,
    /// Submission, polling or download failed.
    Network,
    /// The attempt budget ran out.
    Timeout,
    /// The image could not be written to disk.
    Filesystem,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Config => "configuration error",
            Self::Network => "network error",
            Self::Timeout => "timed out",
            Self::Filesystem => "filesystem error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub detail: String,
}

impl FailureReport {
    pub fn new(kind: FailureKind, detail: impl fmt::Display) -> Self {
        Self {
            kind,
            detail: detail.to_string(),
        }
    }

    /// Single-line message for the caller.
    pub fn message(&self) -> String {
        match self.kind {
            FailureKind::Timeout => TIMEOUT_FAILURE_MESSAGE.to_string(),
            kind => {
                let detail = self.detail.split_whitespace().collect::<Vec<_>>().join(" ");
                format!("Failed to generate image ({kind}): {detail}")
            }
        }
    }
}

#[derive(Debug)]
pub struct SuccessReport {
    /// `/view` URL on the externally reachable ComfyUI host.
    pub remote_url: String,
    pub outcome: TranscodeOutcome,
}

impl SuccessReport {
    pub fn artifact(&self) -> &PersistedArtifact {
        self.outcome.artifact()
    }

    /// Bytes of the saved file, for inline delivery.
    pub fn bytes(&self) -> &[u8] {
        &self.artifact().bytes
    }

    pub fn mime_type(&self) -> &'static str {
        self.artifact().format.mime_type()
    }

    /// Percent saved by transcoding, `None` on the fallback branch.
    pub fn compression_percent(&self) -> Option<f64> {
        match &self.outcome {
            TranscodeOutcome::Transcoded {
                artifact,
                original_bytes,
            } => Some(compression_percent(*original_bytes, artifact.size_bytes())),
            TranscodeOutcome::FallbackRaw { .. } => None,
        }
    }

    pub fn message(&self) -> String {
        let artifact = self.artifact();
        let mut lines = vec![
            "Image generated successfully!".to_string(),
            String::new(),
            format!("Remote URL: {}", self.remote_url),
            format!("Local Path: {}", artifact.path.display()),
        ];

        match &self.outcome {
            TranscodeOutcome::Transcoded { original_bytes, .. } => {
                lines.push(format!(
                    "Size: {:.1}KB ({}) -> {:.1}KB ({})",
                    kib(*original_bytes),
                    ArtifactFormat::Png.label(),
                    kib(artifact.size_bytes()),
                    artifact.format.label(),
                ));
                lines.push(format!(
                    "Compression: {:.1}% smaller",
                    self.compression_percent().unwrap_or_default()
                ));
            }
            TranscodeOutcome::FallbackRaw { .. } => {
                lines.push(format!(
                    "Size: {:.1}KB ({})",
                    kib(artifact.size_bytes()),
                    artifact.format.label()
                ));
            }
        }

        lines.push(String::new());
        lines.push(READ_HINT.to_string());
        lines.join("\n")
    }
}

/// Final result of one generation request.
#[derive(Debug)]
pub enum GenerationReport {
    Success(SuccessReport),
    Failure(FailureReport),
}

impl GenerationReport {
    pub fn failure(kind: FailureKind, detail: impl fmt::Display) -> Self {
        Self::Failure(FailureReport::new(kind, detail))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn message(&self) -> String {
        match self {
            Self::Success(report) => report.message(),
            Self::Failure(report) => report.message(),
        }
    }
}
