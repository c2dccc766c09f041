mod runner;

pub use runner::Runner;

use crate::action::Action;
use crate::condition::Condition;
use crate::config::millis;
use crate::page::Viewport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// One unit of a scenario, executed in order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Navigate(String),
    GoBack,
    WaitFor {
        condition: Condition,
        #[serde(
            rename = "timeout_ms",
            with = "millis::option",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        timeout: Option<Duration>,
    },
    Assert {
        condition: Condition,
        #[serde(
            rename = "timeout_ms",
            with = "millis::option",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        timeout: Option<Duration>,
    },
    WaitForNetworkIdle {
        #[serde(
            rename = "timeout_ms",
            with = "millis::option",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        timeout: Option<Duration>,
    },
    /// Any [`Action`], written in its own form (`{"click": {...}}`)
    #[serde(untagged)]
    Act(Action),
}

impl Step {
    pub fn describe(&self) -> String {
        match self {
            Step::Navigate(url) => format!("navigate to {}", url),
            Step::GoBack => "go back".to_string(),
            Step::WaitFor { condition, .. } => format!("wait for {}", condition.description()),
            Step::Assert { condition, .. } => format!("assert {}", condition.description()),
            Step::WaitForNetworkIdle { .. } => "wait for network idle".to_string(),
            Step::Act(action) => format!("{} `{}`", action.kind(), action.target()),
        }
    }
}

/// A named test case. Each viewport listed runs as a separate repetition on
/// a fresh page; with no viewports it runs once at the browser's size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub viewports: Vec<Viewport>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Errored,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ScenarioStatus,
    pub to: ScenarioStatus,
}

impl ScenarioStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScenarioStatus::Passed | ScenarioStatus::Failed | ScenarioStatus::Errored
        )
    }

    /// Move to `next`: `Pending -> Running -> {Passed, Failed, Errored}`
    pub fn advance(&mut self, next: ScenarioStatus) -> Result<(), InvalidTransition> {
        use ScenarioStatus::*;

        let allowed = matches!(
            (*self, next),
            (Pending, Running) | (Running, Passed) | (Running, Failed) | (Running, Errored)
        );
        if !allowed {
            return Err(InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScenarioStatus::Pending => "pending",
            ScenarioStatus::Running => "running",
            ScenarioStatus::Passed => "passed",
            ScenarioStatus::Failed => "failed",
            ScenarioStatus::Errored => "errored",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_happy_path() {
        let mut status = ScenarioStatus::Pending;
        status.advance(ScenarioStatus::Running).unwrap();
        status.advance(ScenarioStatus::Failed).unwrap();
        assert!(status.is_terminal());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        for terminal in [
            ScenarioStatus::Passed,
            ScenarioStatus::Failed,
            ScenarioStatus::Errored,
        ] {
            let mut status = terminal;
            for next in [
                ScenarioStatus::Pending,
                ScenarioStatus::Running,
                ScenarioStatus::Passed,
                ScenarioStatus::Failed,
                ScenarioStatus::Errored,
            ] {
                assert!(status.advance(next).is_err());
                assert_eq!(status, terminal);
            }
        }
    }

    #[test]
    fn test_cannot_skip_running() {
        let mut status = ScenarioStatus::Pending;
        let err = status.advance(ScenarioStatus::Passed).unwrap_err();
        assert_eq!(err.to_string(), "invalid status transition pending -> passed");
        assert_eq!(status, ScenarioStatus::Pending);
    }

    #[test]
    fn test_step_forms() {
        let json = r#"[
            {"navigate": "https://www.youtube.com/"},
            "go_back",
            {"wait_for": {"condition": {"present": "input#search"}, "timeout_ms": 3000}},
            {"assert": {"condition": {"empty": "input#search"}}},
            {"wait_for_network_idle": {}},
            {"press_key": {"selector": "input#search", "key": "Enter", "post_delay_ms": 200}}
        ]"#;
        let steps: Vec<Step> = serde_json::from_str(json).unwrap();

        assert!(matches!(
            steps[2],
            Step::WaitFor { timeout: Some(t), .. } if t == Duration::from_secs(3)
        ));
        assert!(matches!(steps[3], Step::Assert { timeout: None, .. }));
        assert!(matches!(steps[4], Step::WaitForNetworkIdle { timeout: None }));
        assert!(matches!(steps[5], Step::Act(Action::PressKey { .. })));
        assert_eq!(steps[5].describe(), "press_key `input#search`");
    }
}
