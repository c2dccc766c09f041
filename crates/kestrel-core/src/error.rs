use crate::assertion::AssertionResult;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid suite: {0}")]
    InvalidSuite(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid viewport: {0}")]
    InvalidViewport(String),

    #[error("No scenarios matched: {0}")]
    NoMatch(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by a [`Page`](crate::Page) implementation.
///
/// `ContextDestroyed` and `Disconnected` are fatal: the page can no longer be
/// trusted and the running scenario must stop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("execution context destroyed: {0}")]
    ContextDestroyed(String),

    #[error("browser disconnected: {0}")]
    Disconnected(String),

    #[error("document not ready: {0}")]
    NotReady(String),

    #[error("element not interactable: {0}")]
    NotInteractable(String),

    #[error("stale element handle: {0}")]
    StaleHandle(String),

    #[error("navigation interrupted: {0}")]
    NavigationInterrupted(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl PageError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PageError::ContextDestroyed(_) | PageError::Disconnected(_)
        )
    }
}

/// Why an interaction was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    SelectorUnresolved,
    NotInteractable(String),
    NavigationInterrupted(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::SelectorUnresolved => write!(f, "selector unresolved"),
            FailureReason::NotInteractable(detail) => {
                write!(f, "element not interactable ({})", detail)
            }
            FailureReason::NavigationInterrupted(detail) => {
                write!(f, "navigation interrupted ({})", detail)
            }
        }
    }
}

/// Everything that can end a scenario step unsuccessfully.
#[derive(Error, Debug, Clone)]
pub enum StepError {
    #[error("selector `{selector}` never stabilized within {window:?}: {last_error}")]
    ResolutionTimeout {
        selector: String,
        window: Duration,
        last_error: String,
    },

    #[error("{action} on `{target}` failed: {reason}")]
    ActionFailed {
        action: &'static str,
        target: String,
        reason: FailureReason,
    },

    #[error("timed out after {timeout:?} waiting for {description}")]
    TimedOut {
        description: String,
        expected: String,
        timeout: Duration,
        last_observed: Option<String>,
    },

    #[error("{}", .0.message)]
    AssertionFailed(Box<AssertionResult>),

    #[error("cancelled while {during}")]
    Cancelled { during: String },

    #[error("fatal: {0}")]
    Fatal(PageError),
}

impl StepError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StepError::Fatal(_))
    }

    /// Map a page error raised by an interaction on `target`.
    pub(crate) fn from_page(action: &'static str, target: impl Into<String>, err: PageError) -> Self {
        if err.is_fatal() {
            return StepError::Fatal(err);
        }

        let reason = match err {
            PageError::NavigationInterrupted(detail) => FailureReason::NavigationInterrupted(detail),
            PageError::NotInteractable(detail) | PageError::StaleHandle(detail) => {
                FailureReason::NotInteractable(detail)
            }
            other => FailureReason::NotInteractable(other.to_string()),
        };

        StepError::ActionFailed {
            action,
            target: target.into(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(PageError::ContextDestroyed("navigated".into()).is_fatal());
        assert!(PageError::Disconnected("ws closed".into()).is_fatal());
        assert!(!PageError::NotReady("loading".into()).is_fatal());
        assert!(!PageError::Protocol("oops".into()).is_fatal());
    }

    #[test]
    fn test_from_page_keeps_fatal() {
        let err = StepError::from_page(
            "click",
            "#go",
            PageError::ContextDestroyed("frame detached".into()),
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_from_page_maps_navigation() {
        let err = StepError::from_page(
            "press_key",
            "input#search",
            PageError::NavigationInterrupted("net::ERR_ABORTED".into()),
        );
        match err {
            StepError::ActionFailed { action, target, reason } => {
                assert_eq!(action, "press_key");
                assert_eq!(target, "input#search");
                assert!(matches!(reason, FailureReason::NavigationInterrupted(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_action_failed_message_names_selector() {
        let err = StepError::ActionFailed {
            action: "click",
            target: "#search-icon-legacy".into(),
            reason: FailureReason::SelectorUnresolved,
        };
        assert_eq!(
            err.to_string(),
            "click on `#search-icon-legacy` failed: selector unresolved"
        );
    }
}
