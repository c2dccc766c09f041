use crate::config::DEFAULT_PROBE_WINDOW;
use crate::error::{PageError, StepError};
use crate::page::Page;
use crate::poller::{Deadline, Observation, PollConfig, PollOutcome, Poller};
use crate::selector::{ElementHandle, Selector};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, timeout_at};
use tokio_util::sync::CancellationToken;

/// Retry interval for queries that fail while the document is unstable
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Lazy, restartable resolution of a [`Selector`] against a page.
///
/// Nothing is queried until a method is called, and every call queries again.
#[derive(Debug, Clone)]
pub struct Locator {
    selector: Selector,
    probe_window: Duration,
}

impl Locator {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            probe_window: DEFAULT_PROBE_WINDOW,
        }
    }

    pub fn with_probe_window(mut self, window: Duration) -> Self {
        self.probe_window = window;
        self
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn probe_window(&self) -> Duration {
        self.probe_window
    }

    /// All elements currently matching, possibly none
    pub async fn resolve(&self, page: &dyn Page) -> Result<Vec<ElementHandle>, StepError> {
        self.resolve_within(page, Deadline::after(self.probe_window))
            .await
    }

    /// Like [`resolve`](Self::resolve), retrying transient errors until `deadline`
    pub async fn resolve_within(
        &self,
        page: &dyn Page,
        deadline: Deadline,
    ) -> Result<Vec<ElementHandle>, StepError> {
        loop {
            let query = timeout_at(deadline.instant(), page.query(&self.selector)).await;
            let Ok(result) = query else {
                return Err(self.timeout(self.pending()));
            };
            match result {
                Ok(handles) => {
                    tracing::debug!("`{}` matched {} element(s)", self.selector, handles.len());
                    return Ok(handles);
                }
                Err(err) if err.is_fatal() => return Err(StepError::Fatal(err)),
                Err(err) => {
                    let remaining = deadline.remaining();
                    if remaining.is_zero() {
                        return Err(self.timeout(err));
                    }
                    tracing::debug!("query for `{}` failed, retrying: {}", self.selector, err);
                    sleep(RETRY_INTERVAL.min(remaining)).await;
                }
            }
        }
    }

    pub async fn count(&self, page: &dyn Page) -> Result<usize, StepError> {
        Ok(self.resolve(page).await?.len())
    }

    pub async fn first(&self, page: &dyn Page) -> Result<Option<ElementHandle>, StepError> {
        Ok(self.resolve(page).await?.into_iter().next())
    }

    /// Wait up to the probe window for at least one match.
    ///
    /// Returns `Ok(None)` if the selector never matched. Query errors count
    /// as "not matched yet"; if the window ends on an error rather than an
    /// empty result, that is a `ResolutionTimeout`.
    pub async fn first_present(
        &self,
        page: &dyn Page,
        cancel: &CancellationToken,
    ) -> Result<Option<ElementHandle>, StepError> {
        let deadline = Deadline::after(self.probe_window);
        let poller = Poller::new(PollConfig::default());
        let found: Mutex<Option<ElementHandle>> = Mutex::new(None);
        let last_error: Mutex<Option<PageError>> = Mutex::new(None);
        let pending = self.pending();
        let (found_ref, last_error_ref, pending_ref, selector) =
            (&found, &last_error, &pending, &self.selector);

        let outcome = poller
            .poll(
                move || async move {
                    // Stays set if the query is still pending when the window closes
                    store(last_error_ref, Some(pending_ref.clone()));
                    match page.query(selector).await {
                        Ok(handles) => {
                            store(last_error_ref, None);
                            match handles.into_iter().next() {
                                Some(handle) => {
                                    store(found_ref, Some(handle));
                                    Ok(Observation::met("present"))
                                }
                                None => Ok(Observation::unmet("no match")),
                            }
                        }
                        Err(err) => {
                            store(last_error_ref, (!err.is_fatal()).then(|| err.clone()));
                            Err(err)
                        }
                    }
                },
                deadline,
                cancel,
            )
            .await;

        let found = take(found);
        let last_error = take(last_error);
        match outcome {
            PollOutcome::Satisfied { .. } => Ok(found),
            PollOutcome::TimedOut { .. } => match last_error {
                Some(err) => Err(self.timeout(err)),
                None => Ok(None),
            },
            PollOutcome::Cancelled { .. } => Err(StepError::Cancelled {
                during: format!("resolving `{}`", self.selector),
            }),
            PollOutcome::Fatal(err) => Err(StepError::Fatal(err)),
        }
    }

    fn pending(&self) -> PageError {
        PageError::NotReady(format!("query for `{}` did not complete", self.selector))
    }

    fn timeout(&self, err: PageError) -> StepError {
        StepError::ResolutionTimeout {
            selector: self.selector.to_string(),
            window: self.probe_window,
            last_error: err.to_string(),
        }
    }
}

fn store<T>(slot: &Mutex<T>, value: T) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

fn take<T>(slot: Mutex<T>) -> T {
    slot.into_inner().unwrap_or_else(PoisonError::into_inner)
}
