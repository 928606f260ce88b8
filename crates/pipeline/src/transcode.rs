//! PNG to WebP transcoding with a raw-bytes fallback.
//!
//! The primary path decodes the fetched image and re-encodes it as lossy
//! WebP (quality 85, method 6). Any failure on that path is recovered by
//! writing the original bytes as `.png`; only filesystem failures that
//! also defeat the fallback are returned as errors.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use comfy_mcp_comfyui::job::RawArtifact;
use comfy_mcp_core::naming::artifact_file_name;
use image::DynamicImage;

use crate::error::PipelineError;

/// WebP quality factor (0-100) for the lossy path.
pub const WEBP_QUALITY: f32 = 85.0;

/// libwebp compression effort (0 = fastest, 6 = smallest output).
pub const WEBP_METHOD: i32 = 6;

/// Container format of a persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    WebP,
    Png,
}

impl ArtifactFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::WebP => "webp",
            Self::Png => "png",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::WebP => "image/webp",
            Self::Png => "image/png",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::WebP => "WebP",
            Self::Png => "PNG",
        }
    }
}

/// An image written to disk by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedArtifact {
    /// Absolute path of the written file.
    pub path: PathBuf,
    pub format: ArtifactFormat,
    /// Pixel dimensions, when the source could be decoded.
    pub dimensions: Option<(u32, u32)>,
    /// Exact bytes written to `path`.
    pub bytes: Vec<u8>,
}

impl PersistedArtifact {
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Why the lossy path was abandoned.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeFailure {
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),
}

/// Which branch of the pipeline produced the file.
#[derive(Debug)]
pub enum TranscodeOutcome {
    /// Re-encoded as WebP.
    Transcoded {
        artifact: PersistedArtifact,
        original_bytes: u64,
    },
    /// Original bytes kept as PNG.
    FallbackRaw {
        artifact: PersistedArtifact,
        reason: TranscodeFailure,
    },
}

impl TranscodeOutcome {
    pub fn artifact(&self) -> &PersistedArtifact {
        match self {
            Self::Transcoded { artifact, .. } | Self::FallbackRaw { artifact, .. } => artifact,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::FallbackRaw { .. })
    }
}

/// Size reduction in percent: `(1 - new/original) * 100`.
///
/// Negative when the output grew; `0.0` for an empty original.
pub fn compression_percent(original_bytes: u64, new_bytes: u64) -> f64 {
    if original_bytes == 0 {
        return 0.0;
    }
    (1.0 - new_bytes as f64 / original_bytes as f64) * 100.0
}

/// Lossy WebP encoder settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transcoder {
    pub quality: f32,
    pub method: i32,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self {
            quality: WEBP_QUALITY,
            method: WEBP_METHOD,
        }
    }
}

impl Transcoder {
    /// Convert `raw` and persist it under `dest_dir` as
    /// `image_<timestamp>.<webp|png>`.
    pub async fn transcode(
        &self,
        raw: &RawArtifact,
        dest_dir: &Path,
        timestamp: NaiveDateTime,
    ) -> Result<TranscodeOutcome, PipelineError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| PipelineError::filesystem(dest_dir, e))?;
        let dest_dir = tokio::fs::canonicalize(dest_dir)
            .await
            .map_err(|e| PipelineError::filesystem(dest_dir, e))?;

        match self.write_webp(raw, &dest_dir, timestamp).await {
            Ok(artifact) => Ok(TranscodeOutcome::Transcoded {
                artifact,
                original_bytes: raw.size_bytes(),
            }),
            Err(reason) => {
                tracing::warn!(error = %reason, "WebP conversion failed, keeping original bytes");
                let artifact = write_raw(raw, &dest_dir, timestamp).await?;
                Ok(TranscodeOutcome::FallbackRaw { artifact, reason })
            }
        }
    }

    async fn write_webp(
        &self,
        raw: &RawArtifact,
        dest_dir: &Path,
        timestamp: NaiveDateTime,
    ) -> Result<PersistedArtifact, TranscodeFailure> {
        let source = raw.bytes.clone();
        let settings = *self;
        let (encoded, dimensions) =
            tokio::task::spawn_blocking(move || settings.encode_webp(&source))
                .await
                .map_err(|e| TranscodeFailure::Encode(format!("encoder task failed: {e}")))??;

        let path = dest_dir.join(artifact_file_name(timestamp, ArtifactFormat::WebP.extension()));
        tokio::fs::write(&path, &encoded).await?;

        Ok(PersistedArtifact {
            path,
            format: ArtifactFormat::WebP,
            dimensions: Some(dimensions),
            bytes: encoded,
        })
    }

    /// Decode any supported image and encode it as lossy WebP.
    pub fn encode_webp(&self, source: &[u8]) -> Result<(Vec<u8>, (u32, u32)), TranscodeFailure> {
        let decoded = image::load_from_memory(source)?;
        let dimensions = (decoded.width(), decoded.height());

        // libwebp accepts 8-bit RGB(A) only.
        let pixels = if decoded.color().has_alpha() {
            DynamicImage::ImageRgba8(decoded.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(decoded.to_rgb8())
        };

        let encoder = webp::Encoder::from_image(&pixels)
            .map_err(|e| TranscodeFailure::Encode(e.to_string()))?;

        let mut config = libwebp_sys::WebPConfig::new().map_err(|_| {
            TranscodeFailure::Encode("libwebp rejected the default encoder config".to_string())
        })?;
        config.lossless = 0;
        config.quality = self.quality;
        config.method = self.method;

        let encoded = encoder
            .encode_advanced(&config)
            .map_err(|e| TranscodeFailure::Encode(format!("{e:?}")))?;
        Ok((encoded.to_vec(), dimensions))
    }
}

async fn write_raw(
    raw: &RawArtifact,
    dest_dir: &Path,
    timestamp: NaiveDateTime,
) -> Result<PersistedArtifact, PipelineError> {
    let path = dest_dir.join(artifact_file_name(timestamp, raw.format.extension()));
    tokio::fs::write(&path, &raw.bytes)
        .await
        .map_err(|e| PipelineError::filesystem(&path, e))?;

    Ok(PersistedArtifact {
        dimensions: image::load_from_memory(&raw.bytes)
            .ok()
            .map(|img| (img.width(), img.height())),
        path,
        format: ArtifactFormat::Png,
        bytes: raw.bytes.clone(),
    })
}
