use std::path::PathBuf;

/// Errors the pipeline cannot recover from locally.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The save directory or the fallback file could not be written.
    #[error("Filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}
