use crate::scenario::{Scenario, Step};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A named collection of scenarios sharing setup steps and settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suite {
    pub name: String,

    /// Base for relative `navigate` URLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default)]
    pub settings: Settings,

    /// Steps run at the start of every repetition, before the scenario's own
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<Step>,

    pub scenarios: Vec<Scenario>,
}

/// Suite-level overrides of the run configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_window_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_initial_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_max_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

impl Suite {
    /// Keep only scenarios whose name contains `pattern` (case-insensitive)
    pub fn select(mut self, pattern: &str) -> Result<Self> {
        let needle = pattern.to_lowercase();
        self.scenarios
            .retain(|scenario| scenario.name.to_lowercase().contains(&needle));

        if self.scenarios.is_empty() {
            return Err(Error::NoMatch(format!(
                "no scenario in '{}' matches '{}'",
                self.name, pattern
            )));
        }

        tracing::debug!(
            "filter '{}' selected {} scenario(s)",
            pattern,
            self.scenarios.len()
        );
        Ok(self)
    }

    /// Number of repetitions a full run performs
    pub fn repetitions(&self) -> usize {
        self.scenarios
            .iter()
            .map(|scenario| scenario.viewports.len().max(1))
            .sum()
    }
}
