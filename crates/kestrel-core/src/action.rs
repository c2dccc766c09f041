use crate::config::{DEFAULT_PROBE_WINDOW, millis};
use crate::error::{FailureReason, PageError, StepError};
use crate::locator::Locator;
use crate::page::{Page, PageResult, Viewport};
use crate::selector::{ElementHandle, Selector};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// A typed interaction with the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Click {
        selector: Selector,
    },
    /// One input event per character, `per_key_delay` apart
    TypeText {
        selector: Selector,
        text: String,
        #[serde(rename = "delay_ms", with = "millis", default)]
        per_key_delay: Duration,
    },
    PressKey {
        selector: Selector,
        key: String,
        #[serde(rename = "post_delay_ms", with = "millis", default)]
        post_delay: Duration,
    },
    /// Replace the value in one step
    Fill {
        selector: Selector,
        value: String,
    },
    SetViewport(Viewport),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::TypeText { .. } => "type_text",
            Action::PressKey { .. } => "press_key",
            Action::Fill { .. } => "fill",
            Action::SetViewport(_) => "set_viewport",
        }
    }

    pub fn selector(&self) -> Option<&Selector> {
        match self {
            Action::Click { selector }
            | Action::TypeText { selector, .. }
            | Action::PressKey { selector, .. }
            | Action::Fill { selector, .. } => Some(selector),
            Action::SetViewport(_) => None,
        }
    }

    /// What the action was aimed at, for messages
    pub fn target(&self) -> String {
        match self {
            Action::SetViewport(viewport) => viewport.to_string(),
            _ => self
                .selector()
                .map(|selector| selector.to_string())
                .unwrap_or_default(),
        }
    }

    fn payload(&self) -> Option<String> {
        match self {
            Action::TypeText { text, .. } => Some(text.clone()),
            Action::PressKey { key, .. } => Some(key.clone()),
            Action::Fill { value, .. } => Some(value.clone()),
            Action::SetViewport(viewport) => Some(viewport.to_string()),
            Action::Click { .. } => None,
        }
    }

    fn delay(&self) -> Option<Duration> {
        match self {
            Action::TypeText { per_key_delay, .. } => Some(*per_key_delay),
            Action::PressKey { post_delay, .. } => Some(*post_delay),
            _ => None,
        }
    }
}

/// One entry of an [`ActionRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedAction {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// Milliseconds since the repetition started
    pub offset_ms: u64,
    /// Absent when the action succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordedAction {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Append-only log of dispatched actions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionRecord {
    entries: Vec<RecordedAction>,
}

impl ActionRecord {
    pub fn entries(&self) -> &[RecordedAction] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, entry: RecordedAction) {
        self.entries.push(entry);
    }
}

impl From<ActionRecord> for Vec<RecordedAction> {
    fn from(record: ActionRecord) -> Self {
        record.entries
    }
}

/// Issues interactions against one page, strictly in order, and records them.
///
/// The dispatcher is the only component that changes page state.
pub struct Dispatcher<'p> {
    page: &'p dyn Page,
    probe_window: Duration,
    cancel: CancellationToken,
    record: ActionRecord,
    started: Instant,
}

impl<'p> Dispatcher<'p> {
    pub fn new(page: &'p dyn Page, cancel: CancellationToken) -> Self {
        Self {
            page,
            probe_window: DEFAULT_PROBE_WINDOW,
            cancel,
            record: ActionRecord::default(),
            started: Instant::now(),
        }
    }

    pub fn with_probe_window(mut self, window: Duration) -> Self {
        self.probe_window = window;
        self
    }

    pub fn record(&self) -> &ActionRecord {
        &self.record
    }

    pub fn into_record(self) -> ActionRecord {
        self.record
    }

    pub async fn dispatch(&mut self, action: &Action) -> Result<(), StepError> {
        tracing::debug!("dispatching {} on `{}`", action.kind(), action.target());
        let result = self.perform(action).await;

        if let Err(err) = &result {
            tracing::debug!("{} failed: {}", action.kind(), err);
        }
        self.push(
            action.kind(),
            action.selector().map(|selector| selector.to_string()),
            action.payload(),
            action.delay(),
            &result,
        );
        result
    }

    pub async fn navigate(&mut self, url: &str) -> Result<(), StepError> {
        tracing::debug!("navigating to {}", url);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StepError::Cancelled {
                during: format!("navigating to {}", url),
            }),
            result = self.page.navigate(url) => {
                result.map_err(|err| navigation_error("navigate", url, err))
            }
        };
        self.push("navigate", None, Some(url.to_string()), None, &result);
        result
    }

    pub async fn go_back(&mut self) -> Result<(), StepError> {
        tracing::debug!("navigating back");
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StepError::Cancelled {
                during: "navigating back".to_string(),
            }),
            result = self.page.go_back() => {
                result.map_err(|err| navigation_error("go_back", "history", err))
            }
        };
        self.push("go_back", None, None, None, &result);
        result
    }

    async fn perform(&self, action: &Action) -> Result<(), StepError> {
        match action {
            Action::Click { selector } => {
                let handle = self.locate("click", selector).await?;
                self.interact("click", selector.as_str(), self.page.click(&handle))
                    .await
            }
            Action::TypeText {
                selector,
                text,
                per_key_delay,
            } => {
                let handle = self.locate("type_text", selector).await?;
                for (i, ch) in text.chars().enumerate() {
                    if i > 0 {
                        self.pause(*per_key_delay, || format!("typing into `{}`", selector))
                            .await?;
                    }
                    self.interact(
                        "type_text",
                        selector.as_str(),
                        self.page.dispatch_input(&handle, ch),
                    )
                    .await?;
                }
                Ok(())
            }
            Action::PressKey {
                selector,
                key,
                post_delay,
            } => {
                let handle = self.locate("press_key", selector).await?;
                self.interact("press_key", selector.as_str(), self.page.press_key(&handle, key))
                    .await?;
                self.pause(*post_delay, || format!("waiting after {} on `{}`", key, selector))
                    .await
            }
            Action::Fill { selector, value } => {
                let handle = self.locate("fill", selector).await?;
                self.interact("fill", selector.as_str(), self.page.fill(&handle, value))
                    .await
            }
            Action::SetViewport(viewport) => {
                let target = viewport.to_string();
                self.interact("set_viewport", &target, self.page.set_viewport(*viewport))
                    .await
            }
        }
    }

    /// Run one page call, giving up as soon as the dispatcher is cancelled
    async fn interact(
        &self,
        action: &'static str,
        target: &str,
        call: impl Future<Output = PageResult<()>>,
    ) -> Result<(), StepError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StepError::Cancelled {
                during: format!("{} on `{}`", action, target),
            }),
            result = call => result.map_err(|err| StepError::from_page(action, target, err)),
        }
    }

    async fn locate(
        &self,
        action: &'static str,
        selector: &Selector,
    ) -> Result<ElementHandle, StepError> {
        Locator::new(selector.clone())
            .with_probe_window(self.probe_window)
            .first_present(self.page, &self.cancel)
            .await?
            .ok_or_else(|| StepError::ActionFailed {
                action,
                target: selector.to_string(),
                reason: FailureReason::SelectorUnresolved,
            })
    }

    async fn pause(
        &self,
        duration: Duration,
        during: impl FnOnce() -> String,
    ) -> Result<(), StepError> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StepError::Cancelled { during: during() }),
            _ = sleep(duration) => Ok(()),
        }
    }

    fn push(
        &mut self,
        kind: &str,
        selector: Option<String>,
        payload: Option<String>,
        delay: Option<Duration>,
        result: &Result<(), StepError>,
    ) {
        self.record.push(RecordedAction {
            kind: kind.to_string(),
            selector,
            payload,
            delay_ms: delay.map(|d| d.as_millis() as u64),
            offset_ms: self.started.elapsed().as_millis() as u64,
            error: result.as_ref().err().map(|err| err.to_string()),
        });
    }
}

fn navigation_error(action: &'static str, target: &str, err: PageError) -> StepError {
    match err {
        err if err.is_fatal() => StepError::Fatal(err),
        PageError::NavigationInterrupted(detail) => StepError::ActionFailed {
            action,
            target: target.to_string(),
            reason: FailureReason::NavigationInterrupted(detail),
        },
        other => StepError::ActionFailed {
            action,
            target: target.to_string(),
            reason: FailureReason::NavigationInterrupted(other.to_string()),
        },
    }
}
