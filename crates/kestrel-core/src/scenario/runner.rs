use super::{Scenario, ScenarioStatus, Step};
use crate::action::{Action, Dispatcher};
use crate::assertion::Evaluator;
use crate::config::RunConfig;
use crate::error::StepError;
use crate::page::{Page, PageFactory, Viewport};
use crate::poller::{Deadline, PollOutcome, Poller};
use crate::report::{Failure, ScenarioReport, SuiteReport};
use crate::suite::Suite;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Runs scenarios against pages opened from a [`PageFactory`].
pub struct Runner<F> {
    factory: F,
    config: RunConfig,
}

impl<F: PageFactory> Runner<F> {
    pub fn new(factory: F, config: RunConfig) -> Self {
        Self { factory, config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn into_factory(self) -> F {
        self.factory
    }

    /// Run every scenario of `suite`, up to `concurrency` at a time.
    ///
    /// Reports come back in suite order regardless of completion order.
    pub async fn run_suite(&self, suite: &Suite, cancel: &CancellationToken) -> SuiteReport {
        let started_at = chrono::Utc::now().to_rfc3339();
        let started = Instant::now();
        tracing::info!(
            "Running suite '{}': {} scenario(s), concurrency {}",
            suite.name,
            suite.scenarios.len(),
            self.config.concurrency
        );

        let reports: Vec<Vec<ScenarioReport>> = stream::iter(suite.scenarios.iter())
            .map(|scenario| {
                let token = cancel.child_token();
                async move { self.run_scenario(scenario, &suite.setup, &token).await }
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let report = SuiteReport::new(
            suite.name.clone(),
            started_at,
            started.elapsed().as_millis() as u64,
            reports.into_iter().flatten().collect(),
        );
        tracing::info!(
            "Suite '{}' finished: {} passed, {} failed, {} errored",
            report.suite,
            report.passed,
            report.failed,
            report.errored
        );
        report
    }

    /// Run `scenario` once per viewport (or once, if it lists none)
    pub async fn run_scenario(
        &self,
        scenario: &Scenario,
        setup: &[Step],
        cancel: &CancellationToken,
    ) -> Vec<ScenarioReport> {
        if scenario.viewports.is_empty() {
            return vec![
                self.run_repetition(scenario.name.clone(), None, setup, &scenario.steps, cancel)
                    .await,
            ];
        }

        let mut reports = Vec::with_capacity(scenario.viewports.len());
        for viewport in &scenario.viewports {
            let name = format!("{} [{}]", scenario.name, viewport);
            reports.push(
                self.run_repetition(name, Some(*viewport), setup, &scenario.steps, cancel)
                    .await,
            );
        }
        reports
    }

    async fn run_repetition(
        &self,
        name: String,
        viewport: Option<Viewport>,
        setup: &[Step],
        steps: &[Step],
        cancel: &CancellationToken,
    ) -> ScenarioReport {
        let started = Instant::now();
        let mut status = ScenarioStatus::Pending;
        transition(&mut status, ScenarioStatus::Running);
        tracing::debug!("Starting '{}'", name);

        let page = match self.factory.open().await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!("Could not open a page for '{}': {}", name, err);
                transition(&mut status, ScenarioStatus::Errored);
                return ScenarioReport {
                    name,
                    status,
                    duration_ms: started.elapsed().as_millis() as u64,
                    viewport,
                    failure: Some(Failure::from(&StepError::Fatal(err))),
                    actions: Vec::new(),
                };
            }
        };

        let mut dispatcher = Dispatcher::new(page.as_ref(), cancel.clone())
            .with_probe_window(self.config.probe_window);
        let result = self
            .run_steps(&mut dispatcher, page.as_ref(), viewport, setup, steps, cancel)
            .await;
        let actions = dispatcher.into_record();

        if let Err(err) = page.close().await {
            tracing::debug!("Closing page for '{}' failed: {}", name, err);
        }

        let failure = match &result {
            Ok(()) => {
                transition(&mut status, ScenarioStatus::Passed);
                tracing::info!("'{}' passed", name);
                None
            }
            Err(err) if err.is_fatal() => {
                transition(&mut status, ScenarioStatus::Errored);
                tracing::warn!("'{}' errored: {}", name, err);
                Some(Failure::from(err))
            }
            Err(err) => {
                transition(&mut status, ScenarioStatus::Failed);
                tracing::info!("'{}' failed: {}", name, err);
                Some(Failure::from(err))
            }
        };

        ScenarioReport {
            name,
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            viewport,
            failure,
            actions: actions.into(),
        }
    }

    async fn run_steps(
        &self,
        dispatcher: &mut Dispatcher<'_>,
        page: &dyn Page,
        viewport: Option<Viewport>,
        setup: &[Step],
        steps: &[Step],
        cancel: &CancellationToken,
    ) -> Result<(), StepError> {
        if let Some(viewport) = viewport {
            dispatcher.dispatch(&Action::SetViewport(viewport)).await?;
        }

        for step in setup.iter().chain(steps) {
            tracing::debug!("step: {}", step.describe());
            self.run_step(dispatcher, page, step, cancel).await?;
        }
        Ok(())
    }

    async fn run_step(
        &self,
        dispatcher: &mut Dispatcher<'_>,
        page: &dyn Page,
        step: &Step,
        cancel: &CancellationToken,
    ) -> Result<(), StepError> {
        match step {
            Step::Navigate(url) => dispatcher.navigate(url).await,
            Step::GoBack => dispatcher.go_back().await,
            Step::Act(action) => dispatcher.dispatch(action).await,
            Step::WaitFor { condition, timeout } => {
                let timeout = self.config.timeout_for(*timeout);
                let poller = Poller::new(self.config.poll);
                match poller
                    .wait_for(page, condition, Deadline::after(timeout), cancel)
                    .await
                {
                    PollOutcome::Satisfied { .. } => Ok(()),
                    PollOutcome::TimedOut { last, .. } => Err(StepError::TimedOut {
                        description: condition.description(),
                        expected: condition.expected(),
                        timeout,
                        last_observed: last.map(|observation| observation.observed),
                    }),
                    PollOutcome::Cancelled { .. } => Err(StepError::Cancelled {
                        during: format!("waiting for {}", condition.description()),
                    }),
                    PollOutcome::Fatal(err) => Err(StepError::Fatal(err)),
                }
            }
            Step::Assert { condition, timeout } => {
                let timeout = self.config.timeout_for(*timeout);
                let result = Evaluator::new(Poller::new(self.config.poll))
                    .assert_eventually(page, condition, Deadline::after(timeout), cancel)
                    .await?;
                if result.passed {
                    Ok(())
                } else {
                    Err(StepError::AssertionFailed(Box::new(result)))
                }
            }
            Step::WaitForNetworkIdle { timeout } => {
                let timeout = self.config.timeout_for(*timeout);
                wait_for_network_idle(page, timeout, cancel).await
            }
        }
    }
}

async fn wait_for_network_idle(
    page: &dyn Page,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), StepError> {
    let timed_out = |last_observed: Option<String>| StepError::TimedOut {
        description: "network idle".to_string(),
        expected: "no requests in flight".to_string(),
        timeout,
        last_observed,
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StepError::Cancelled {
            during: "waiting for network idle".to_string(),
        }),
        result = tokio::time::timeout(timeout, page.wait_for_network_idle(timeout)) => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) if err.is_fatal() => Err(StepError::Fatal(err)),
            Ok(Err(err)) => Err(timed_out(Some(err.to_string()))),
            Err(_) => Err(timed_out(None)),
        },
    }
}

fn transition(status: &mut ScenarioStatus, next: ScenarioStatus) {
    if let Err(err) = status.advance(next) {
        tracing::error!("{}", err);
    }
}
