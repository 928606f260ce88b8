//! Generation pipeline: turns a prompt into a saved image and a report.
//!
//! [`generator::Generator`] drives one request end to end (bind, submit,
//! poll, fetch, transcode), [`transcode`] converts the fetched PNG to
//! WebP with a raw-bytes fallback, and [`report`] renders the outcome.

pub mod error;
pub mod generator;
pub mod report;
pub mod transcode;
