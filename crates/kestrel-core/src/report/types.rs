use crate::action::RecordedAction;
use crate::error::StepError;
use crate::page::Viewport;
use crate::scenario::ScenarioStatus;
use serde::{Deserialize, Serialize};

/// Outcome of one scenario repetition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub name: String,
    pub status: ScenarioStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(default)]
    pub actions: Vec<RecordedAction>,
}

/// Expected vs. observed for a failed or errored repetition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub expected: Option<String>,
    pub observed: Option<String>,
    pub message: String,
}

impl From<&StepError> for Failure {
    fn from(err: &StepError) -> Self {
        let message = err.to_string();
        match err {
            StepError::AssertionFailed(result) => Failure {
                expected: Some(result.expected.clone()),
                observed: result.observed.clone(),
                message: result.message.clone(),
            },
            StepError::TimedOut {
                expected,
                last_observed,
                ..
            } => Failure {
                expected: Some(expected.clone()),
                observed: last_observed.clone(),
                message,
            },
            StepError::ActionFailed {
                action,
                target,
                reason,
            } => Failure {
                expected: Some(format!("{} on `{}` to succeed", action, target)),
                observed: Some(reason.to_string()),
                message,
            },
            StepError::ResolutionTimeout {
                selector,
                last_error,
                ..
            } => Failure {
                expected: Some(format!("`{}` to resolve", selector)),
                observed: Some(last_error.clone()),
                message,
            },
            StepError::Cancelled { .. } | StepError::Fatal(_) => Failure {
                expected: None,
                observed: None,
                message,
            },
        }
    }
}

/// Outcome of a whole suite run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteReport {
    pub suite: String,
    /// RFC 3339
    pub started_at: String,
    pub duration_ms: u64,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub scenarios: Vec<ScenarioReport>,
}

impl SuiteReport {
    pub fn new(
        suite: impl Into<String>,
        started_at: String,
        duration_ms: u64,
        scenarios: Vec<ScenarioReport>,
    ) -> Self {
        let count = |status: ScenarioStatus| scenarios.iter().filter(|s| s.status == status).count();
        Self {
            suite: suite.into(),
            started_at,
            duration_ms,
            passed: count(ScenarioStatus::Passed),
            failed: count(ScenarioStatus::Failed),
            errored: count(ScenarioStatus::Errored),
            scenarios,
        }
    }

    pub fn total(&self) -> usize {
        self.scenarios.len()
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.scenarios.len()
    }
}
