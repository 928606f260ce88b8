//! File naming for persisted artifacts.
//!
//! Artifacts are written as `image_<YYYYMMDD_HHMMSS>.<ext>` using local
//! wall-clock time. Two images saved within the same second share a
//! name; the later one overwrites the earlier.

use chrono::NaiveDateTime;

pub const ARTIFACT_FILE_PREFIX: &str = "image_";

/// `strftime` pattern for the timestamp part of artifact names.
pub const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Build the artifact file name for a timestamp and extension.
pub fn artifact_file_name(timestamp: NaiveDateTime, extension: &str) -> String {
    format!(
        "{ARTIFACT_FILE_PREFIX}{}.{extension}",
        timestamp.format(ARTIFACT_TIMESTAMP_FORMAT)
    )
}

/// Current local time, the clock used for artifact names.
pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}
