use crate::error::PageError;
use crate::selector::{ElementHandle, Selector};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub type PageResult<T> = std::result::Result<T, PageError>;

/// Browser window size in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Viewport {
    type Err = Error;

    /// Parse `WIDTHxHEIGHT`, e.g. `1280x720`
    fn from_str(s: &str) -> Result<Self> {
        let (width, height) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| Error::InvalidViewport(format!("expected WIDTHxHEIGHT, got '{}'", s)))?;

        let width = width
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::InvalidViewport(format!("invalid width in '{}'", s)))?;
        let height = height
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::InvalidViewport(format!("invalid height in '{}'", s)))?;

        if width == 0 || height == 0 {
            return Err(Error::InvalidViewport(format!(
                "viewport dimensions must be positive, got '{}'",
                s
            )));
        }

        Ok(Viewport { width, height })
    }
}

/// Capabilities the engine needs from a browser automation runtime.
///
/// Implementations own the protocol; the engine only sequences calls and
/// interprets their results. Query and read operations must not mutate the
/// document.
#[async_trait]
pub trait Page: Send + Sync {
    async fn navigate(&self, url: &str) -> PageResult<()>;

    /// Go one entry back in session history
    async fn go_back(&self) -> PageResult<()>;

    async fn current_url(&self) -> PageResult<String>;

    /// Resolve a selector to the elements it currently matches, in document order
    async fn query(&self, selector: &Selector) -> PageResult<Vec<ElementHandle>>;

    async fn text(&self, handle: &ElementHandle) -> PageResult<String>;

    async fn attribute(&self, handle: &ElementHandle, name: &str) -> PageResult<Option<String>>;

    /// Current value of a form control, `None` for elements without one
    async fn value(&self, handle: &ElementHandle) -> PageResult<Option<String>>;

    async fn is_visible(&self, handle: &ElementHandle) -> PageResult<bool>;

    async fn click(&self, handle: &ElementHandle) -> PageResult<()>;

    /// Emit exactly one discrete input event for `ch`
    async fn dispatch_input(&self, handle: &ElementHandle, ch: char) -> PageResult<()>;

    async fn press_key(&self, handle: &ElementHandle, key: &str) -> PageResult<()>;

    /// Replace the control's value in one step
    async fn fill(&self, handle: &ElementHandle, value: &str) -> PageResult<()>;

    async fn set_viewport(&self, viewport: Viewport) -> PageResult<()>;

    async fn wait_for_network_idle(&self, timeout: Duration) -> PageResult<()>;

    async fn close(&self) -> PageResult<()> {
        Ok(())
    }
}

/// Source of fresh, isolated pages. Every call to `open` must return a page
/// that shares no document state with pages opened earlier.
#[async_trait]
pub trait PageFactory: Send + Sync {
    async fn open(&self) -> PageResult<Box<dyn Page>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_parse() {
        let viewport: Viewport = "1280x720".parse().unwrap();
        assert_eq!(viewport, Viewport::new(1280, 720));

        let upper: Viewport = " 768X1024 ".parse().unwrap();
        assert_eq!(upper, Viewport::new(768, 1024));
    }

    #[test]
    fn test_viewport_parse_invalid() {
        assert!("1280".parse::<Viewport>().is_err());
        assert!("axb".parse::<Viewport>().is_err());
        assert!("0x720".parse::<Viewport>().is_err());
        assert!("1280x-1".parse::<Viewport>().is_err());
    }

    #[test]
    fn test_viewport_display() {
        assert_eq!(Viewport::new(375, 667).to_string(), "375x667");
    }
}
