//! In-memory [`Page`] and [`PageFactory`] for tests.
//!
//! A `FakePage` holds a flat list of elements keyed by the selector string
//! they answer to, a URL with history, and scripted effects that run when an
//! element is clicked or receives a key.

use crate::error::PageError;
use crate::page::{Page, PageFactory, PageResult, Viewport};
use crate::selector::{ElementHandle, Selector};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeElement {
    pub text: String,
    /// `Some` for form controls
    pub value: Option<String>,
    pub visible: bool,
    pub interactable: bool,
    pub attributes: BTreeMap<String, String>,
    pub appear_after: Option<Duration>,
}

impl FakeElement {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            value: None,
            visible: true,
            interactable: true,
            attributes: BTreeMap::new(),
            appear_after: None,
        }
    }

    pub fn input(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::text("")
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn not_interactable(mut self) -> Self {
        self.interactable = false;
        self
    }

    /// Not matched by queries until `delay` after it was added
    pub fn appear_after(mut self, delay: Duration) -> Self {
        self.appear_after = Some(delay);
        self
    }
}

/// Scripted consequence of a click or key press
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Navigate(String),
    /// Empty the value of every element matching the selector
    Clear(String),
    /// Navigate to `url_prefix` followed by the form-encoded value of `input`
    Submit { input: String, url_prefix: String },
    /// Add an element, e.g. a suggestion list appearing
    Reveal { selector: String, element: FakeElement },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Click { selector: String, at: Instant },
    Char { selector: String, ch: char, at: Instant },
    Key { selector: String, key: String, at: Instant },
    Fill { selector: String, value: String, at: Instant },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Trigger {
    Click,
    Key(String),
}

#[derive(Debug)]
struct Node {
    selector: String,
    element: FakeElement,
    added: Instant,
}

impl Node {
    fn attached(&self, now: Instant) -> bool {
        match self.element.appear_after {
            Some(delay) => now >= self.added + delay,
            None => true,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    url: String,
    history: Vec<String>,
    nodes: Vec<Node>,
    effects: Vec<(String, Trigger, Effect)>,
    events: Vec<InputEvent>,
    viewports: Vec<Viewport>,
    failing_queries: usize,
    query_error: Option<PageError>,
    query_latency: Duration,
    input_latency: Duration,
    network_busy: Duration,
    network_error: Option<PageError>,
    closed: bool,
}

impl State {
    fn check_open(&self) -> PageResult<()> {
        if self.closed {
            return Err(PageError::Disconnected("page is closed".to_string()));
        }
        Ok(())
    }

    fn node(&self, handle: &ElementHandle) -> PageResult<&Node> {
        self.check_open()?;
        self.nodes
            .get(handle.id() as usize)
            .ok_or_else(|| PageError::StaleHandle(format!("no element with id {}", handle.id())))
    }

    fn node_mut(&mut self, handle: &ElementHandle) -> PageResult<&mut Node> {
        self.check_open()?;
        let node = self
            .nodes
            .get_mut(handle.id() as usize)
            .ok_or_else(|| PageError::StaleHandle(format!("no element with id {}", handle.id())))?;
        if !node.element.interactable || !node.element.visible {
            return Err(PageError::NotInteractable(format!(
                "`{}` cannot receive input",
                node.selector
            )));
        }
        Ok(node)
    }

    fn navigate(&mut self, url: String) {
        let previous = std::mem::replace(&mut self.url, url);
        self.history.push(previous);
    }

    fn fire(&mut self, selector: &str, trigger: Trigger) {
        let effects: Vec<Effect> = self
            .effects
            .iter()
            .filter(|(target, on, _)| target == selector && *on == trigger)
            .map(|(_, _, effect)| effect.clone())
            .collect();

        for effect in effects {
            match effect {
                Effect::Navigate(url) => self.navigate(url),
                Effect::Clear(target) => {
                    for node in self.nodes.iter_mut().filter(|n| n.selector == target) {
                        if node.element.value.is_some() {
                            node.element.value = Some(String::new());
                        } else {
                            node.element.text.clear();
                        }
                    }
                }
                Effect::Submit { input, url_prefix } => {
                    let value = self
                        .nodes
                        .iter()
                        .find(|n| n.selector == input)
                        .and_then(|n| n.element.value.clone())
                        .unwrap_or_default();
                    let encoded: String =
                        url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
                    self.navigate(format!("{}{}", url_prefix, encoded));
                }
                Effect::Reveal { selector, element } => self.nodes.push(Node {
                    selector,
                    element,
                    added: Instant::now(),
                }),
            }
        }
    }
}

/// Scriptable in-memory page. Clones share state.
#[derive(Debug, Clone)]
pub struct FakePage {
    state: Arc<Mutex<State>>,
}

impl FakePage {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                url: url.into(),
                ..State::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_element(self, selector: impl Into<String>, element: FakeElement) -> Self {
        self.add_element(selector, element);
        self
    }

    pub fn add_element(&self, selector: impl Into<String>, element: FakeElement) {
        self.lock().nodes.push(Node {
            selector: selector.into(),
            element,
            added: Instant::now(),
        });
    }

    pub fn on_click(self, selector: impl Into<String>, effect: Effect) -> Self {
        self.lock()
            .effects
            .push((selector.into(), Trigger::Click, effect));
        self
    }

    pub fn on_key(self, selector: impl Into<String>, key: impl Into<String>, effect: Effect) -> Self {
        self.lock()
            .effects
            .push((selector.into(), Trigger::Key(key.into()), effect));
        self
    }

    /// Make the next `count` queries fail with `error`
    pub fn fail_queries(&self, count: usize, error: PageError) {
        let mut state = self.lock();
        state.failing_queries = count;
        state.query_error = Some(error);
    }

    /// Delay every query by `latency`
    pub fn stall_queries(&self, latency: Duration) {
        self.lock().query_latency = latency;
    }

    /// Delay every click, keystroke and fill by `latency`
    pub fn stall_input(&self, latency: Duration) {
        self.lock().input_latency = latency;
    }

    /// Network becomes idle `busy` after a wait starts; a wait shorter than
    /// that fails with `NotReady` when its timeout runs out
    pub fn with_network_busy(self, busy: Duration) -> Self {
        self.lock().network_busy = busy;
        self
    }

    /// Every network-idle wait fails with `error`
    pub fn fail_network_idle(&self, error: PageError) {
        self.lock().network_error = Some(error);
    }

    async fn stall(&self, latency: fn(&State) -> Duration) {
        let delay = latency(&self.lock());
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    pub fn url(&self) -> String {
        self.lock().url.clone()
    }

    pub fn value_of(&self, selector: &str) -> Option<String> {
        self.lock()
            .nodes
            .iter()
            .find(|n| n.selector == selector)
            .and_then(|n| n.element.value.clone())
    }

    pub fn input_events(&self) -> Vec<InputEvent> {
        self.lock().events.clone()
    }

    pub fn viewports(&self) -> Vec<Viewport> {
        self.lock().viewports.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[async_trait]
impl Page for FakePage {
    async fn navigate(&self, url: &str) -> PageResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        state.navigate(url.to_string());
        Ok(())
    }

    async fn go_back(&self) -> PageResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        match state.history.pop() {
            Some(previous) => {
                state.url = previous;
                Ok(())
            }
            None => Err(PageError::NavigationInterrupted(
                "no previous history entry".to_string(),
            )),
        }
    }

    async fn current_url(&self) -> PageResult<String> {
        let state = self.lock();
        state.check_open()?;
        Ok(state.url.clone())
    }

    async fn query(&self, selector: &Selector) -> PageResult<Vec<ElementHandle>> {
        self.stall(|state| state.query_latency).await;
        let mut state = self.lock();
        state.check_open()?;

        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            if let Some(err) = state.query_error.clone() {
                return Err(err);
            }
        }

        let now = Instant::now();
        let handles = state
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.selector == selector.as_str() && node.attached(now))
            .enumerate()
            .map(|(index, (id, _))| ElementHandle::new(id as u64, selector.clone(), index))
            .collect();
        Ok(handles)
    }

    async fn text(&self, handle: &ElementHandle) -> PageResult<String> {
        Ok(self.lock().node(handle)?.element.text.clone())
    }

    async fn attribute(&self, handle: &ElementHandle, name: &str) -> PageResult<Option<String>> {
        Ok(self.lock().node(handle)?.element.attributes.get(name).cloned())
    }

    async fn value(&self, handle: &ElementHandle) -> PageResult<Option<String>> {
        Ok(self.lock().node(handle)?.element.value.clone())
    }

    async fn is_visible(&self, handle: &ElementHandle) -> PageResult<bool> {
        Ok(self.lock().node(handle)?.element.visible)
    }

    async fn click(&self, handle: &ElementHandle) -> PageResult<()> {
        self.stall(|state| state.input_latency).await;
        let mut state = self.lock();
        let selector = state.node_mut(handle)?.selector.clone();
        state.events.push(InputEvent::Click {
            selector: selector.clone(),
            at: Instant::now(),
        });
        state.fire(&selector, Trigger::Click);
        Ok(())
    }

    async fn dispatch_input(&self, handle: &ElementHandle, ch: char) -> PageResult<()> {
        self.stall(|state| state.input_latency).await;
        let mut state = self.lock();
        let node = state.node_mut(handle)?;
        match node.element.value.as_mut() {
            Some(value) => value.push(ch),
            None => node.element.text.push(ch),
        }
        let selector = node.selector.clone();
        state.events.push(InputEvent::Char {
            selector,
            ch,
            at: Instant::now(),
        });
        Ok(())
    }

    async fn press_key(&self, handle: &ElementHandle, key: &str) -> PageResult<()> {
        self.stall(|state| state.input_latency).await;
        let mut state = self.lock();
        let selector = state.node_mut(handle)?.selector.clone();
        state.events.push(InputEvent::Key {
            selector: selector.clone(),
            key: key.to_string(),
            at: Instant::now(),
        });
        state.fire(&selector, Trigger::Key(key.to_string()));
        Ok(())
    }

    async fn fill(&self, handle: &ElementHandle, value: &str) -> PageResult<()> {
        self.stall(|state| state.input_latency).await;
        let mut state = self.lock();
        let node = state.node_mut(handle)?;
        match node.element.value.as_mut() {
            Some(current) => *current = value.to_string(),
            None => {
                return Err(PageError::NotInteractable(format!(
                    "`{}` is not a form control",
                    node.selector
                )));
            }
        }
        let selector = node.selector.clone();
        state.events.push(InputEvent::Fill {
            selector,
            value: value.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn set_viewport(&self, viewport: Viewport) -> PageResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        state.viewports.push(viewport);
        Ok(())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> PageResult<()> {
        let busy = {
            let state = self.lock();
            state.check_open()?;
            if let Some(err) = state.network_error.clone() {
                return Err(err);
            }
            state.network_busy
        };

        if busy > timeout {
            sleep(timeout).await;
            return Err(PageError::NotReady(format!(
                "network still busy after {:?}",
                timeout
            )));
        }
        sleep(busy).await;
        Ok(())
    }

    async fn close(&self) -> PageResult<()> {
        self.lock().closed = true;
        Ok(())
    }
}

type PageBuilder = dyn Fn(usize) -> FakePage + Send + Sync;

/// [`PageFactory`] handing out a new `FakePage` per `open`.
///
/// The builder receives the zero-based open count, so tests can script
/// different pages for different repetitions.
#[derive(Clone)]
pub struct FakeBrowser {
    build: Arc<PageBuilder>,
    opened: Arc<Mutex<Vec<FakePage>>>,
    open_error: Option<PageError>,
}

impl FakeBrowser {
    pub fn new(build: impl Fn(usize) -> FakePage + Send + Sync + 'static) -> Self {
        Self {
            build: Arc::new(build),
            opened: Arc::new(Mutex::new(Vec::new())),
            open_error: None,
        }
    }

    /// Every `open` fails with `error`
    pub fn failing(error: PageError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::new(|_| FakePage::new("about:blank"))
        }
    }

    /// Pages opened so far, in order
    pub fn opened(&self) -> Vec<FakePage> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PageFactory for FakeBrowser {
    async fn open(&self) -> PageResult<Box<dyn Page>> {
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }
        let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
        let page = (self.build)(opened.len());
        opened.push(page.clone());
        Ok(Box::new(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(raw: &str) -> Selector {
        Selector::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_history() {
        let page = FakePage::new("https://example.test/");
        page.navigate("https://example.test/results").await.unwrap();
        assert_eq!(page.current_url().await.unwrap(), "https://example.test/results");

        page.go_back().await.unwrap();
        assert_eq!(page.current_url().await.unwrap(), "https://example.test/");
        assert!(page.go_back().await.is_err());
    }

    #[tokio::test]
    async fn test_click_effect_clears_input() {
        let page = FakePage::new("https://example.test/")
            .with_element("input#search", FakeElement::input("playwright"))
            .with_element("button.clear", FakeElement::text("x"))
            .on_click("button.clear", Effect::Clear("input#search".into()));

        let handles = page.query(&sel("button.clear")).await.unwrap();
        page.click(&handles[0]).await.unwrap();
        assert_eq!(page.value_of("input#search").as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_closed_page_is_disconnected() {
        let page = FakePage::new("https://example.test/");
        page.close().await.unwrap();

        let err = page.current_url().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_network_idle_script() {
        let page =
            FakePage::new("https://example.test/").with_network_busy(Duration::from_millis(30));
        page.wait_for_network_idle(Duration::from_millis(200)).await.unwrap();

        let err = page
            .wait_for_network_idle(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, PageError::NotReady(_)));

        page.fail_network_idle(PageError::Disconnected("ws closed".into()));
        assert!(page.wait_for_network_idle(Duration::from_secs(1)).await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_stalled_input_is_delayed() {
        let page = FakePage::new("https://example.test/").with_element("#go", FakeElement::text("go"));
        page.stall_input(Duration::from_millis(40));

        let handles = page.query(&sel("#go")).await.unwrap();
        let start = Instant::now();
        page.click(&handles[0]).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_browser_opens_isolated_pages() {
        let browser = FakeBrowser::new(|_| {
            FakePage::new("about:blank").with_element("input#search", FakeElement::input(""))
        });

        let first = browser.open().await.unwrap();
        let second = browser.open().await.unwrap();
        first.navigate("https://example.test/a").await.unwrap();

        assert_eq!(second.current_url().await.unwrap(), "about:blank");
        assert_eq!(browser.opened().len(), 2);
    }
}
