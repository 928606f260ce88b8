//! Progress events emitted while a generation request runs.
//!
//! Components report through a [`ProgressSink`]; the MCP layer turns
//! events into `notifications/message` frames, tests record them.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::job::JobHandle;

/// Severity attached to an event when it is forwarded to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Error,
}

/// A notable step of one generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    /// The workflow was accepted by ComfyUI.
    Submitted { handle: JobHandle },

    /// One status check finished (1-based attempt of `total`).
    StatusChecked { attempt: u32, total: u32 },

    /// The rendered image was downloaded.
    ImageFetched { bytes: u64 },

    /// The image was re-encoded and written.
    Saved {
        path: PathBuf,
        original_bytes: u64,
        saved_bytes: u64,
        reduction_percent: f64,
    },

    /// Re-encoding failed; the original bytes are kept instead.
    TranscodeFallback { reason: String },
}

impl GenerationEvent {
    pub fn level(&self) -> EventLevel {
        match self {
            Self::TranscodeFallback { .. } => EventLevel::Error,
            _ => EventLevel::Info,
        }
    }

    /// Human-readable one-liner for client-facing log notifications.
    pub fn message(&self) -> String {
        match self {
            Self::Submitted { .. } => "Submitted prompt".to_string(),
            Self::StatusChecked { attempt, total } => {
                format!("Checking status... (attempt {attempt}/{total})")
            }
            Self::ImageFetched { .. } => "Image generated".to_string(),
            Self::Saved {
                path,
                original_bytes,
                saved_bytes,
                reduction_percent,
            } => format!(
                "Saved to {}: {:.1}KB -> {:.1}KB ({reduction_percent:.1}% reduction)",
                path.display(),
                kib(*original_bytes),
                kib(*saved_bytes),
            ),
            Self::TranscodeFallback { reason } => {
                format!("WebP conversion failed: {reason}, falling back to PNG")
            }
        }
    }
}

/// Size in KiB, the unit used in all user-facing size figures.
pub fn kib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

/// Receiver for [`GenerationEvent`]s.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: GenerationEvent);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: GenerationEvent) {}
}

/// Sink that keeps every event, for assertions.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<GenerationEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<GenerationEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, event: GenerationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
