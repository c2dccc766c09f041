use crate::condition::Condition;
use crate::error::StepError;
use crate::page::Page;
use crate::poller::{Deadline, PollOutcome, Poller};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of one eventually-consistent assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub passed: bool,
    pub description: String,
    pub expected: String,
    /// Last value seen; `None` only if the condition was never evaluated
    pub observed: Option<String>,
    pub message: String,
    pub attempts: u32,
    #[serde(rename = "elapsedMs", serialize_with = "serialize_elapsed")]
    pub elapsed: Duration,
}

fn serialize_elapsed<S: serde::Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(value.as_millis() as u64)
}

#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    poller: Poller,
}

impl Evaluator {
    pub fn new(poller: Poller) -> Self {
        Self { poller }
    }

    /// Poll `condition` until it holds or `deadline` passes.
    ///
    /// A timeout is a failed result, not an error. Cancellation and fatal
    /// page errors are returned as `Err`.
    pub async fn assert_eventually(
        &self,
        page: &dyn Page,
        condition: &Condition,
        deadline: Deadline,
        cancel: &CancellationToken,
    ) -> Result<AssertionResult, StepError> {
        let started = Instant::now();
        let description = condition.description();
        let expected = condition.expected();

        match self.poller.wait_for(page, condition, deadline, cancel).await {
            PollOutcome::Satisfied {
                observation,
                attempts,
            } => Ok(AssertionResult {
                passed: true,
                message: format!("expected {}: ok", description),
                description,
                expected,
                observed: Some(observation.observed),
                attempts,
                elapsed: started.elapsed(),
            }),
            PollOutcome::TimedOut { last, attempts } => {
                let elapsed = started.elapsed();
                let observed = last.map(|observation| observation.observed);
                let message = format!(
                    "expected {} within {:?}; expected {}, last observed {}",
                    description,
                    elapsed,
                    expected,
                    observed.as_deref().unwrap_or("nothing")
                );
                tracing::debug!("{}", message);
                Ok(AssertionResult {
                    passed: false,
                    description,
                    expected,
                    observed,
                    message,
                    attempts,
                    elapsed,
                })
            }
            PollOutcome::Cancelled { .. } => Err(StepError::Cancelled {
                during: format!("asserting {}", description),
            }),
            PollOutcome::Fatal(err) => Err(StepError::Fatal(err)),
        }
    }
}
