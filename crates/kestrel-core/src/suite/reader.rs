use super::types::Suite;
use crate::scenario::Step;
use crate::{Error, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use url::{ParseError, Url};

pub struct SuiteReader;

impl SuiteReader {
    /// Read and parse a suite file from the given path
    pub fn from_file(path: &Path) -> Result<Suite> {
        tracing::debug!("Reading suite file from: {}", path.display());

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut suite: Suite = serde_json::from_reader(reader)?;
        resolve_urls(&mut suite)?;

        tracing::info!(
            "Loaded suite '{}' with {} scenario(s)",
            suite.name,
            suite.scenarios.len()
        );

        Ok(suite)
    }

    /// Parse a suite from a JSON string
    pub fn from_str(content: &str) -> Result<Suite> {
        tracing::debug!("Parsing suite from string");

        let mut suite: Suite = serde_json::from_str(content)?;
        resolve_urls(&mut suite)?;

        tracing::debug!(
            "Parsed suite '{}' with {} scenario(s)",
            suite.name,
            suite.scenarios.len()
        );

        Ok(suite)
    }

    /// Check the structural rules a suite must satisfy before running
    pub fn validate(suite: &Suite) -> Result<()> {
        tracing::debug!("Validating suite structure");

        if suite.name.trim().is_empty() {
            return Err(Error::InvalidSuite("Suite name is empty".to_string()));
        }

        if suite.scenarios.is_empty() {
            return Err(Error::InvalidSuite(format!(
                "Suite '{}' has no scenarios",
                suite.name
            )));
        }

        let mut seen = HashSet::new();
        for (idx, scenario) in suite.scenarios.iter().enumerate() {
            if scenario.name.trim().is_empty() {
                return Err(Error::InvalidSuite(format!("Scenario {} has no name", idx)));
            }
            if !seen.insert(scenario.name.as_str()) {
                return Err(Error::InvalidSuite(format!(
                    "Duplicate scenario name '{}'",
                    scenario.name
                )));
            }
            if scenario.steps.is_empty() {
                return Err(Error::InvalidSuite(format!(
                    "Scenario '{}' has no steps",
                    scenario.name
                )));
            }

            let mut viewports = HashSet::new();
            for viewport in &scenario.viewports {
                if !viewports.insert(*viewport) {
                    return Err(Error::InvalidSuite(format!(
                        "Scenario '{}' lists viewport {} twice",
                        scenario.name, viewport
                    )));
                }
            }
        }

        if suite.settings.concurrency == Some(0) {
            tracing::warn!("settings.concurrency is 0, running scenarios one at a time");
        }

        tracing::debug!("Suite structure is valid");
        Ok(())
    }
}

/// Make every `navigate` URL absolute against the suite's `base_url`
fn resolve_urls(suite: &mut Suite) -> Result<()> {
    let base = match &suite.base_url {
        Some(raw) => Some(
            Url::parse(raw)
                .map_err(|e| Error::InvalidSuite(format!("Invalid base_url '{}': {}", raw, e)))?,
        ),
        None => None,
    };

    let steps = suite
        .setup
        .iter_mut()
        .chain(suite.scenarios.iter_mut().flat_map(|s| s.steps.iter_mut()));

    for step in steps {
        if let Step::Navigate(url) = step {
            *url = resolve_url(base.as_ref(), url)?;
        }
    }
    Ok(())
}

fn resolve_url(base: Option<&Url>, raw: &str) -> Result<String> {
    match Url::parse(raw) {
        Ok(url) => Ok(url.to_string()),
        Err(ParseError::RelativeUrlWithoutBase) => {
            let base = base.ok_or_else(|| {
                Error::InvalidSuite(format!(
                    "Relative URL '{}' needs a base_url in the suite",
                    raw
                ))
            })?;
            base.join(raw)
                .map(|url| url.to_string())
                .map_err(|e| Error::InvalidSuite(format!("Invalid URL '{}': {}", raw, e)))
        }
        Err(e) => Err(Error::InvalidSuite(format!("Invalid URL '{}': {}", raw, e))),
    }
}
