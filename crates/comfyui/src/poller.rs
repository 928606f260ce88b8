//! Bounded fixed-interval polling of a submitted job.
//!
//! After submission, [`poll_until_complete`] queries the history store
//! until the job reports completion or the attempt budget runs out:
//!
//! ```text
//! Submitted -> Polling{1} -> Polling{2} -> ... -> Completed
//!                                              \-> TimedOut
//! ```
//!
//! A handle missing from the history store is retried like a pending
//! job, since ComfyUI only records a prompt once it has run. Exhausting
//! the budget is a normal outcome, not an error. There is no
//! cancellation: once started, the loop runs until one of the two
//! terminal states or a transport error.

use std::future::Future;
use std::time::Duration;

use comfy_mcp_core::config::{GeneratorConfig, DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECS};

use crate::api::ComfyUIApiError;
use crate::events::{GenerationEvent, ProgressSink};
use crate::job::{ArtifactReference, JobHandle, JobStatus};
use crate::store::ArtifactStore;

/// Attempt budget and spacing for the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Maximum number of status queries.
    pub max_attempts: u32,
    /// Delay between consecutive queries.
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

impl From<&GeneratorConfig> for PollConfig {
    fn from(config: &GeneratorConfig) -> Self {
        Self {
            max_attempts: config.max_poll_attempts,
            interval: config.poll_interval,
        }
    }
}

impl PollConfig {
    /// Upper bound on time spent sleeping between attempts.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Source of delays between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Real-time sleeper backed by [`tokio::time::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// States of one poll sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Polling { attempt: u32 },
    Completed { reference: ArtifactReference, attempts: u32 },
    TimedOut { attempts: u32, not_found_attempts: u32 },
}

/// Terminal result of [`poll_until_complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The job finished; `reference` locates its first output image.
    Completed {
        reference: ArtifactReference,
        attempts: u32,
    },
    /// The attempt budget ran out before the job finished.
    TimedOut {
        attempts: u32,
        /// How many of those attempts did not find the handle at all.
        not_found_attempts: u32,
    },
}

/// Poll `handle` until it completes or `config.max_attempts` is spent.
///
/// Reports [`GenerationEvent::StatusChecked`] after every query and
/// sleeps `config.interval` between queries (never after the last one).
/// Transport and protocol errors abort the loop.
pub async fn poll_until_complete<S, Z, P>(
    store: &S,
    handle: &JobHandle,
    output_node_id: &str,
    config: &PollConfig,
    sleeper: &Z,
    progress: &P,
) -> Result<PollOutcome, ComfyUIApiError>
where
    S: ArtifactStore,
    Z: Sleeper,
    P: ProgressSink + ?Sized,
{
    let mut state = PollState::Submitted;
    let mut not_found_attempts = 0u32;

    loop {
        state = match state {
            PollState::Submitted if config.max_attempts == 0 => PollState::TimedOut {
                attempts: 0,
                not_found_attempts,
            },
            PollState::Submitted => PollState::Polling { attempt: 1 },

            PollState::Polling { attempt } => {
                let status = store.query_status(handle, output_node_id).await?;
                progress.report(GenerationEvent::StatusChecked {
                    attempt,
                    total: config.max_attempts,
                });

                match status {
                    JobStatus::Completed(reference) => PollState::Completed {
                        reference,
                        attempts: attempt,
                    },
                    unfinished => {
                        if unfinished == JobStatus::NotFound {
                            not_found_attempts += 1;
                            tracing::debug!(prompt_id = %handle, attempt, "Job not in history yet");
                        }
                        if attempt >= config.max_attempts {
                            PollState::TimedOut {
                                attempts: attempt,
                                not_found_attempts,
                            }
                        } else {
                            sleeper.sleep(config.interval).await;
                            PollState::Polling {
                                attempt: attempt + 1,
                            }
                        }
                    }
                }
            }

            PollState::Completed {
                reference,
                attempts,
            } => {
                tracing::info!(prompt_id = %handle, attempts, "Job completed");
                return Ok(PollOutcome::Completed {
                    reference,
                    attempts,
                });
            }

            PollState::TimedOut {
                attempts,
                not_found_attempts,
            } => {
                tracing::warn!(
                    prompt_id = %handle,
                    attempts,
                    not_found_attempts,
                    "Job did not complete within the poll budget",
                );
                return Ok(PollOutcome::TimedOut {
                    attempts,
                    not_found_attempts,
                });
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use serde_json::Value;

    use super::*;
    use crate::events::{NoProgress, RecordingProgress};
    use crate::job::RawArtifact;

    /// Store that answers status queries from a script and counts calls.
    #[derive(Default)]
    struct ScriptedStore {
        statuses: Mutex<VecDeque<Result<JobStatus, ComfyUIApiError>>>,
        queries: AtomicU32,
        fetches: AtomicU32,
    }

    impl ScriptedStore {
        fn new(statuses: Vec<JobStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into_iter().map(Ok).collect()),
                ..Default::default()
            }
        }

        fn queries(&self) -> u32 {
            self.queries.load(Ordering::SeqCst)
        }
    }

    impl ArtifactStore for ScriptedStore {
        async fn submit(&self, _workflow: &Value) -> Result<JobHandle, ComfyUIApiError> {
            Ok(JobHandle::new("abc123"))
        }

        async fn query_status(
            &self,
            _handle: &JobHandle,
            _output_node_id: &str,
        ) -> Result<JobStatus, ComfyUIApiError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(JobStatus::Pending))
        }

        async fn fetch_artifact(
            &self,
            _reference: &ArtifactReference,
        ) -> Result<RawArtifact, ComfyUIApiError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(RawArtifact::png(Vec::new()))
        }
    }

    /// Sleeper that returns immediately and records requested delays.
    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    fn reference() -> ArtifactReference {
        ArtifactReference::new([("filename", "out.png"), ("subfolder", ""), ("type", "output")])
    }

    fn config(max_attempts: u32) -> PollConfig {
        PollConfig {
            max_attempts,
            interval: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn completes_on_the_attempt_that_reports_completion() {
        let store = ScriptedStore::new(vec![
            JobStatus::Pending,
            JobStatus::Pending,
            JobStatus::Completed(reference()),
        ]);
        let sleeper = RecordingSleeper::default();
        let progress = RecordingProgress::default();

        let outcome = poll_until_complete(
            &store,
            &JobHandle::new("abc123"),
            "9",
            &config(60),
            &sleeper,
            &progress,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Completed {
                reference: reference(),
                attempts: 3
            }
        );
        assert_eq!(store.queries(), 3);
        assert_eq!(*sleeper.slept.lock().unwrap(), vec![Duration::from_secs(2); 2]);
        assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(
            progress.events(),
            (1..=3)
                .map(|attempt| GenerationEvent::StatusChecked { attempt, total: 60 })
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn times_out_after_budget_without_sleeping_past_last_attempt() {
        let store = ScriptedStore::new(vec![JobStatus::Pending; 3]);
        let sleeper = RecordingSleeper::default();

        let outcome = poll_until_complete(
            &store,
            &JobHandle::new("abc123"),
            "9",
            &config(3),
            &sleeper,
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                attempts: 3,
                not_found_attempts: 0
            }
        );
        assert_eq!(store.queries(), 3);
        assert_eq!(sleeper.slept.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn not_found_is_retried_and_counted() {
        let store = ScriptedStore::new(vec![
            JobStatus::NotFound,
            JobStatus::NotFound,
            JobStatus::Pending,
            JobStatus::Completed(reference()),
        ]);

        let outcome = poll_until_complete(
            &store,
            &JobHandle::new("abc123"),
            "9",
            &config(10),
            &RecordingSleeper::default(),
            &NoProgress,
        )
        .await
        .unwrap();
        assert_matches!(outcome, PollOutcome::Completed { attempts: 4, .. });

        let store = ScriptedStore::new(vec![JobStatus::NotFound; 2]);
        let outcome = poll_until_complete(
            &store,
            &JobHandle::new("abc123"),
            "9",
            &config(2),
            &RecordingSleeper::default(),
            &NoProgress,
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                attempts: 2,
                not_found_attempts: 2
            }
        );
    }

    #[tokio::test]
    async fn completion_on_last_attempt_still_completes() {
        let store = ScriptedStore::new(vec![JobStatus::Pending, JobStatus::Completed(reference())]);
        let outcome = poll_until_complete(
            &store,
            &JobHandle::new("abc123"),
            "9",
            &config(2),
            &RecordingSleeper::default(),
            &NoProgress,
        )
        .await
        .unwrap();
        assert_matches!(outcome, PollOutcome::Completed { attempts: 2, .. });
    }

    #[tokio::test]
    async fn transport_error_aborts_the_loop() {
        let store = ScriptedStore::new(vec![JobStatus::Pending]);
        store
            .statuses
            .lock()
            .unwrap()
            .push_back(Err(ComfyUIApiError::ApiError {
                status: 500,
                body: "boom".into(),
            }));
        let sleeper = RecordingSleeper::default();

        let result = poll_until_complete(
            &store,
            &JobHandle::new("abc123"),
            "9",
            &config(10),
            &sleeper,
            &NoProgress,
        )
        .await;

        assert_matches!(result, Err(ComfyUIApiError::ApiError { status: 500, .. }));
        assert_eq!(store.queries(), 2);
        assert_eq!(sleeper.slept.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_budget_times_out_without_querying() {
        let store = ScriptedStore::new(vec![JobStatus::Completed(reference())]);
        let outcome = poll_until_complete(
            &store,
            &JobHandle::new("abc123"),
            "9",
            &config(0),
            &RecordingSleeper::default(),
            &NoProgress,
        )
        .await
        .unwrap();
        assert_matches!(outcome, PollOutcome::TimedOut { attempts: 0, .. });
        assert_eq!(store.queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn real_sleeper_stays_within_wall_clock_bound() {
        let store = ScriptedStore::new(vec![JobStatus::Pending; 5]);
        let poll = PollConfig {
            max_attempts: 5,
            interval: Duration::from_secs(2),
        };
        let started = tokio::time::Instant::now();

        let outcome = poll_until_complete(
            &store,
            &JobHandle::new("abc123"),
            "9",
            &poll,
            &TokioSleeper,
            &NoProgress,
        )
        .await
        .unwrap();

        assert_matches!(outcome, PollOutcome::TimedOut { attempts: 5, .. });
        let elapsed = started.elapsed();
        assert!(elapsed >= poll.max_wait());
        assert!(elapsed <= poll.interval * poll.max_attempts);
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = PollConfig::default();
        assert_eq!(config.max_attempts, 60);
        assert_eq!(config.interval, Duration::from_secs(2));
        assert_eq!(config.max_wait(), Duration::from_secs(118));
    }
}
