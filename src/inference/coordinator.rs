//! Deadline-bounded inference
//!
//! Runs a blocking [`TextGenerator`] call on tokio's blocking pool and waits
//! for it at most until a deadline. On timeout the caller gets an answer right
//! away and the worker's stop signal is raised so it winds down early. Its
//! result is dropped together with the detached task, so nothing it returns
//! can reach this or any later request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::inference::engine::GenerationParams;
use crate::inference::outcome::{InferenceOutcome, TextGenerator};

/// What the coordinator hands back to the chat service
#[derive(Debug, Clone, PartialEq)]
pub enum BoundedCallResult {
    Completed(InferenceOutcome),
    DeadlineExceeded,
}

/// Raises the stop signal when dropped, unless the call finished first.
///
/// Covers both the deadline and a caller that drops the whole `run` future.
struct StopOnDrop {
    stop_signal: Arc<AtomicBool>,
    finished: bool,
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if !self.finished {
            self.stop_signal.store(true, Ordering::Relaxed);
        }
    }
}

/// Bounds both how long a request waits and how many workers can be alive.
///
/// Every worker holds a permit until the generation call actually returns,
/// abandoned workers included. When all permits are held, new requests wait
/// for one, and that wait counts against their deadline.
#[derive(Clone)]
pub struct InferenceCoordinator {
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl InferenceCoordinator {
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Worker slots not currently taken
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run one generation, giving up after `deadline`.
    pub async fn run(
        &self,
        generator: Arc<dyn TextGenerator>,
        prompt: String,
        params: GenerationParams,
        deadline: Duration,
    ) -> BoundedCallResult {
        let permits = Arc::clone(&self.permits);
        let stop_signal = Arc::new(AtomicBool::new(false));
        let mut guard = StopOnDrop {
            stop_signal: Arc::clone(&stop_signal),
            finished: false,
        };

        let call = async move {
            let permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return InferenceOutcome::Error("inference workers closed".to_string()),
            };

            let worker = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                generator.generate(&prompt, &params, &stop_signal)
            });

            match worker.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("Error in response generation thread: {}", e);
                    InferenceOutcome::Error(format!("inference worker failed: {}", e))
                }
            }
        };

        match tokio::time::timeout(deadline, call).await {
            Ok(outcome) => {
                guard.finished = true;
                BoundedCallResult::Completed(outcome)
            }
            Err(_) => {
                tracing::warn!("Response generation timed out after {:?}", deadline);
                BoundedCallResult::DeadlineExceeded
            }
        }
    }
}
