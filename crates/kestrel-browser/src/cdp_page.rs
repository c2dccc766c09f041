use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::InsertTextParams;
use chromiumoxide::cdp::browser_protocol::target::DisposeBrowserContextParams;
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page as ChromePage;
use kestrel_core::poller::Deadline;
use kestrel_core::{ElementHandle, Page, PageError, PageResult, Selector, SelectorKind, Viewport};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Network is idle once the resource count has not changed for this long
const NETWORK_QUIET: Duration = Duration::from_millis(500);
const NETWORK_POLL: Duration = Duration::from_millis(100);

/// [`Page`] backed by a Chrome tab over CDP.
///
/// Handles are not pinned to DOM nodes: every operation re-finds the element
/// by selector and index, so a handle whose element went away reports
/// `StaleHandle` instead of acting on a detached node.
pub struct CdpPage {
    page: ChromePage,
    browser: Arc<Browser>,
    context: Option<BrowserContextId>,
    next_id: AtomicU64,
}

impl CdpPage {
    pub fn new(page: ChromePage, browser: Arc<Browser>, context: Option<BrowserContextId>) -> Self {
        Self {
            page,
            browser,
            context,
            next_id: AtomicU64::new(1),
        }
    }

    async fn eval<T: DeserializeOwned>(&self, expression: String) -> PageResult<T> {
        self.page
            .evaluate(expression)
            .await
            .map_err(|e| classify(&e))?
            .into_value::<T>()
            .map_err(|e| PageError::Protocol(format!("unexpected script result: {}", e)))
    }

    /// Evaluate `body` with `el` bound to the handle's element
    async fn eval_on<T: DeserializeOwned>(&self, handle: &ElementHandle, body: &str) -> PageResult<T> {
        let expression = format!(
            "(() => {{ const el = {}; if (!el) return {{ stale: true }}; return {{ value: (() => {{ {} }})() }}; }})()",
            find_expression(handle.selector(), handle.index()),
            body
        );
        let result: serde_json::Value = self.eval(expression).await?;
        if result.get("stale").is_some() {
            return Err(stale(handle));
        }
        serde_json::from_value(result.get("value").cloned().unwrap_or(serde_json::Value::Null))
            .map_err(|e| PageError::Protocol(format!("unexpected script result: {}", e)))
    }

    async fn element(&self, handle: &ElementHandle) -> PageResult<Element> {
        let selector = handle.selector();
        let found = match selector.kind() {
            SelectorKind::Css => self.page.find_elements(selector.query()).await,
            SelectorKind::XPath => self.page.find_xpaths(selector.query()).await,
        }
        .map_err(|e| classify(&e))?;

        found
            .into_iter()
            .nth(handle.index())
            .ok_or_else(|| stale(handle))
    }

    /// Reject input to elements a user could not reach
    async fn ensure_interactable(&self, handle: &ElementHandle) -> PageResult<()> {
        let problem: Option<String> = self
            .eval_on(
                handle,
                r#"
                el.scrollIntoView({ block: 'center', inline: 'center' });
                if (el.disabled) return 'element is disabled';
                const rect = el.getBoundingClientRect();
                if (rect.width === 0 || rect.height === 0) return 'element has no size';
                const style = window.getComputedStyle(el);
                if (style.visibility === 'hidden' || style.display === 'none') return 'element is hidden';
                return null;
                "#,
            )
            .await?;

        match problem {
            Some(reason) => Err(PageError::NotInteractable(format!(
                "`{}`: {}",
                handle.selector(),
                reason
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Page for CdpPage {
    async fn navigate(&self, url: &str) -> PageResult<()> {
        self.page.goto(url).await.map_err(|e| classify_navigation(&e))?;
        Ok(())
    }

    async fn go_back(&self) -> PageResult<()> {
        let moved: bool = self
            .eval("(() => { if (window.history.length < 2) return false; window.history.back(); return true; })()".to_string())
            .await?;
        if !moved {
            return Err(PageError::NavigationInterrupted(
                "no previous history entry".to_string(),
            ));
        }
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| classify_navigation(&e))?;
        Ok(())
    }

    async fn current_url(&self) -> PageResult<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| classify(&e))?
            .unwrap_or_default())
    }

    async fn query(&self, selector: &Selector) -> PageResult<Vec<ElementHandle>> {
        let count: usize = self.eval(count_expression(selector)).await?;
        let handles = (0..count)
            .map(|index| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                ElementHandle::new(id, selector.clone(), index)
            })
            .collect();
        Ok(handles)
    }

    async fn text(&self, handle: &ElementHandle) -> PageResult<String> {
        self.eval_on(handle, "return el.innerText ?? el.textContent ?? '';")
            .await
    }

    async fn attribute(&self, handle: &ElementHandle, name: &str) -> PageResult<Option<String>> {
        let body = format!("return el.getAttribute({});", js_string(name));
        self.eval_on(handle, &body).await
    }

    async fn value(&self, handle: &ElementHandle) -> PageResult<Option<String>> {
        self.eval_on(
            handle,
            "return ('value' in el && typeof el.value === 'string') ? el.value : null;",
        )
        .await
    }

    async fn is_visible(&self, handle: &ElementHandle) -> PageResult<bool> {
        self.eval_on(
            handle,
            r#"
            const style = window.getComputedStyle(el);
            if (style.visibility === 'hidden' || style.display === 'none' || style.opacity === '0') return false;
            const rect = el.getBoundingClientRect();
            return rect.width > 0 && rect.height > 0;
            "#,
        )
        .await
    }

    async fn click(&self, handle: &ElementHandle) -> PageResult<()> {
        self.ensure_interactable(handle).await?;
        let element = self.element(handle).await?;
        element.click().await.map_err(|e| classify_input(&e))?;
        Ok(())
    }

    async fn dispatch_input(&self, handle: &ElementHandle, ch: char) -> PageResult<()> {
        self.ensure_interactable(handle).await?;
        let element = self.element(handle).await?;
        element.focus().await.map_err(|e| classify_input(&e))?;
        if typed_with_key_events(ch) {
            element
                .type_str(ch.to_string())
                .await
                .map_err(|e| classify_input(&e))?;
        } else {
            // No key definition exists for it, so commit it as composed text
            self.page
                .execute(InsertTextParams::new(ch.to_string()))
                .await
                .map_err(|e| classify_input(&e))?;
        }
        Ok(())
    }

    async fn press_key(&self, handle: &ElementHandle, key: &str) -> PageResult<()> {
        self.ensure_interactable(handle).await?;
        let element = self.element(handle).await?;
        element.focus().await.map_err(|e| classify_input(&e))?;
        element.press_key(key).await.map_err(|e| classify_input(&e))?;
        Ok(())
    }

    async fn fill(&self, handle: &ElementHandle, value: &str) -> PageResult<()> {
        self.ensure_interactable(handle).await?;
        let body = format!(
            r#"
            if (!('value' in el)) return false;
            el.focus();
            el.value = {};
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;
            "#,
            js_string(value)
        );
        let filled: bool = self.eval_on(handle, &body).await?;
        if !filled {
            return Err(PageError::NotInteractable(format!(
                "`{}` is not a form control",
                handle.selector()
            )));
        }
        Ok(())
    }

    async fn set_viewport(&self, viewport: Viewport) -> PageResult<()> {
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width as i64)
            .height(viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(PageError::Protocol)?;
        self.page.execute(params).await.map_err(|e| classify(&e))?;
        tracing::debug!("Viewport set to {}", viewport);
        Ok(())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> PageResult<()> {
        let mut tracker = IdleTracker::new(Instant::now(), timeout);

        loop {
            let (ready, count): (bool, usize) = self
                .eval(
                    "[document.readyState === 'complete', performance.getEntriesByType('resource').length]"
                        .to_string(),
                )
                .await?;

            match tracker.observe(ready, count, Instant::now()) {
                Idle::Quiet => return Ok(()),
                Idle::Expired => {
                    return Err(PageError::NotReady(format!(
                        "network still active after {:?} ({} resources)",
                        timeout, count
                    )));
                }
                Idle::Busy => sleep(NETWORK_POLL.min(tracker.deadline.remaining())).await,
            }
        }
    }

    async fn close(&self) -> PageResult<()> {
        self.page.clone().close().await.map_err(|e| classify(&e))?;
        if let Some(context) = &self.context {
            self.browser
                .execute(DisposeBrowserContextParams::new(context.clone()))
                .await
                .map_err(|e| classify(&e))?;
        }
        Ok(())
    }
}

fn stale(handle: &ElementHandle) -> PageError {
    PageError::StaleHandle(format!(
        "`{}` no longer has a match at index {}",
        handle.selector(),
        handle.index()
    ))
}

/// A JS string literal for `value`
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn count_expression(selector: &Selector) -> String {
    let query = js_string(selector.query());
    match selector.kind() {
        SelectorKind::Css => format!("document.querySelectorAll({}).length", query),
        SelectorKind::XPath => format!(
            "document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null).snapshotLength",
            query
        ),
    }
}

fn find_expression(selector: &Selector, index: usize) -> String {
    let query = js_string(selector.query());
    match selector.kind() {
        SelectorKind::Css => format!("(document.querySelectorAll({})[{}] || null)", query, index),
        SelectorKind::XPath => format!(
            "document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null).snapshotItem({})",
            query, index
        ),
    }
}

pub(crate) fn classify(err: &CdpError) -> PageError {
    classify_message(err.to_string())
}

fn classify_navigation(err: &CdpError) -> PageError {
    match classify(err) {
        PageError::Protocol(message) => PageError::NavigationInterrupted(message),
        other => other,
    }
}

fn classify_input(err: &CdpError) -> PageError {
    match classify(err) {
        PageError::Protocol(message) => PageError::NotInteractable(message),
        other => other,
    }
}

/// Map a CDP error message to the engine's page error kinds.
///
/// A destroyed execution context is expected while a navigation is in
/// flight, so it is transient; only a closed target or session is fatal.
pub(crate) fn classify_message(message: String) -> PageError {
    let lower = message.to_lowercase();

    if lower.contains("target closed")
        || lower.contains("no target with given id")
        || lower.contains("session with given id not found")
    {
        PageError::ContextDestroyed(message)
    } else if lower.contains("channel closed")
        || lower.contains("connection closed")
        || lower.contains("websocket")
        || lower.contains("send error")
    {
        PageError::Disconnected(message)
    } else if lower.contains("execution context was destroyed")
        || lower.contains("cannot find context with specified id")
        || lower.contains("inspected target navigated or closed")
        || lower.contains("timed out")
        || lower.contains("timeout")
    {
        PageError::NotReady(message)
    } else if lower.contains("node is detached")
        || lower.contains("could not find node")
        || lower.contains("no node with given id")
    {
        PageError::StaleHandle(message)
    } else if lower.contains("could not compute box model")
        || lower.contains("not visible")
        || lower.contains("not an element")
    {
        PageError::NotInteractable(message)
    } else if lower.contains("net::err_") || lower.contains("navigation") {
        PageError::NavigationInterrupted(message)
    } else {
        PageError::Protocol(message)
    }
}

/// Characters Chrome can synthesize key events for
fn typed_with_key_events(ch: char) -> bool {
    ch.is_ascii_graphic() || matches!(ch, ' ' | '\n' | '\r' | '\t')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Idle {
    Quiet,
    Busy,
    Expired,
}

/// Tracks the resource count until it holds still for [`NETWORK_QUIET`]
#[derive(Debug)]
struct IdleTracker {
    deadline: Deadline,
    last_count: Option<usize>,
    quiet_since: Instant,
}

impl IdleTracker {
    fn new(start: Instant, timeout: Duration) -> Self {
        Self {
            deadline: Deadline::after_from(start, timeout),
            last_count: None,
            quiet_since: start,
        }
    }

    fn observe(&mut self, ready: bool, count: usize, now: Instant) -> Idle {
        if !ready || self.last_count != Some(count) {
            self.last_count = Some(count);
            self.quiet_since = now;
        } else if now.saturating_duration_since(self.quiet_since) >= NETWORK_QUIET {
            return Idle::Quiet;
        }

        if now >= self.deadline.instant() {
            Idle::Expired
        } else {
            Idle::Busy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_fatal() {
        assert!(classify_message("Target closed".into()).is_fatal());
        assert!(classify_message("Session with given id not found.".into()).is_fatal());
        assert!(classify_message("channel closed".into()).is_fatal());
    }

    #[test]
    fn test_classify_transient_during_navigation() {
        let err = classify_message("Execution context was destroyed.".into());
        assert_eq!(err, PageError::NotReady("Execution context was destroyed.".into()));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_classify_input_errors() {
        assert!(matches!(
            classify_message("Could not compute box model.".into()),
            PageError::NotInteractable(_)
        ));
        assert!(matches!(
            classify_message("Node is detached from document".into()),
            PageError::StaleHandle(_)
        ));
        assert!(matches!(
            classify_message("net::ERR_NAME_NOT_RESOLVED".into()),
            PageError::NavigationInterrupted(_)
        ));
        assert!(matches!(
            classify_message("something unexpected".into()),
            PageError::Protocol(_)
        ));
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string(r#"ul[role="listbox"]"#), r#""ul[role=\"listbox\"]""#);
        assert_eq!(js_string("a\nb"), r#""a\nb""#);
    }

    #[test]
    fn test_expressions_by_kind() {
        let css = Selector::parse("input#search").unwrap();
        assert_eq!(
            count_expression(&css),
            r#"document.querySelectorAll("input#search").length"#
        );

        let xpath = Selector::parse(r#"//*[@id="search-icon-legacy"]"#).unwrap();
        let find = find_expression(&xpath, 2);
        assert!(find.starts_with("document.evaluate("));
        assert!(find.ends_with(".snapshotItem(2)"));
    }

    #[test]
    fn test_characters_without_key_definitions_are_inserted() {
        assert!(typed_with_key_events('a'));
        assert!(typed_with_key_events(' '));
        assert!(typed_with_key_events('?'));
        assert!(!typed_with_key_events('é'));
        assert!(!typed_with_key_events('日'));
        assert!(!typed_with_key_events('🦀'));
    }

    #[test]
    fn test_idle_after_quiet_period() {
        let start = Instant::now();
        let mut tracker = IdleTracker::new(start, Duration::from_secs(5));

        assert_eq!(tracker.observe(true, 3, start), Idle::Busy);
        assert_eq!(
            tracker.observe(true, 4, start + Duration::from_millis(200)),
            Idle::Busy
        );
        assert_eq!(
            tracker.observe(true, 4, start + Duration::from_millis(500)),
            Idle::Busy
        );
        assert_eq!(
            tracker.observe(true, 4, start + Duration::from_millis(700)),
            Idle::Quiet
        );
    }

    #[test]
    fn test_loading_document_never_counts_as_quiet() {
        let start = Instant::now();
        let mut tracker = IdleTracker::new(start, Duration::from_secs(1));

        assert_eq!(tracker.observe(false, 0, start), Idle::Busy);
        assert_eq!(
            tracker.observe(false, 0, start + Duration::from_millis(900)),
            Idle::Busy
        );
        assert_eq!(
            tracker.observe(false, 0, start + Duration::from_secs(1)),
            Idle::Expired
        );
    }

    #[test]
    fn test_zero_timeout_expires_immediately() {
        let start = Instant::now();
        let mut tracker = IdleTracker::new(start, Duration::ZERO);
        assert_eq!(tracker.observe(true, 1, start), Idle::Expired);
    }

    #[test]
    fn test_huge_timeout_does_not_overflow() {
        let start = Instant::now();
        let mut tracker = IdleTracker::new(start, Duration::from_millis(u64::MAX));

        assert_eq!(tracker.observe(true, 1, start), Idle::Busy);
        assert!(tracker.deadline.remaining() > Duration::from_secs(3600));
        assert!(NETWORK_POLL.min(tracker.deadline.remaining()) == NETWORK_POLL);
    }
}
