//! ComfyUI REST client and job polling.
//!
//! Provides the HTTP API wrapper (submit, history, view), typed parsing
//! of history responses into job status, the [`store::ArtifactStore`]
//! seam used by the rest of the system, progress events, and the
//! bounded poll loop that waits for a job to finish.

pub mod api;
pub mod events;
pub mod history;
pub mod job;
pub mod poller;
pub mod store;
