use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Query language of a [`Selector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorKind {
    Css,
    XPath,
}

/// A typed, immutable reference to elements in a remote document.
///
/// Parsing rules:
/// - `css=` prefix forces CSS
/// - `xpath=` prefix, or a query starting with `//` or `(//`, is XPath
/// - anything else is CSS
///
/// A selector may match any number of elements, including none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Selector {
    raw: String,
    kind: SelectorKind,
    query_start: usize,
}

impl Selector {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidSelector("selector is empty".to_string()));
        }

        let (kind, query_start) = if trimmed.starts_with("css=") {
            (SelectorKind::Css, "css=".len())
        } else if trimmed.starts_with("xpath=") {
            (SelectorKind::XPath, "xpath=".len())
        } else if trimmed.starts_with("//") || trimmed.starts_with("(//") {
            (SelectorKind::XPath, 0)
        } else {
            (SelectorKind::Css, 0)
        };

        if trimmed[query_start..].trim().is_empty() {
            return Err(Error::InvalidSelector(format!(
                "selector '{}' has an empty query",
                trimmed
            )));
        }

        Ok(Self {
            raw: trimmed.to_string(),
            kind,
            query_start,
        })
    }

    /// Shorthand for a CSS selector
    pub fn css(query: &str) -> Result<Self> {
        Self::parse(&format!("css={}", query))
    }

    /// Shorthand for an XPath selector
    pub fn xpath(query: &str) -> Result<Self> {
        Self::parse(&format!("xpath={}", query))
    }

    pub fn kind(&self) -> SelectorKind {
        self.kind
    }

    /// The query without any engine prefix
    pub fn query(&self) -> &str {
        self.raw[self.query_start..].trim()
    }

    /// The selector exactly as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Selector {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.raw
    }
}

/// A page-local reference to one element returned by a single resolution.
///
/// Handles are only meaningful to the page that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    id: u64,
    selector: Selector,
    index: usize,
}

impl ElementHandle {
    pub fn new(id: u64, selector: Selector, index: usize) -> Self {
        Self {
            id,
            selector,
            index,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The selector this handle was resolved from
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Position among the elements the selector matched
    pub fn index(&self) -> usize {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_css_by_default() {
        let selector = Selector::parse("input#search").unwrap();
        assert_eq!(selector.kind(), SelectorKind::Css);
        assert_eq!(selector.query(), "input#search");
    }

    #[test]
    fn test_xpath_detection() {
        let selector = Selector::parse(r#"//*[@id="search-icon-legacy"]"#).unwrap();
        assert_eq!(selector.kind(), SelectorKind::XPath);
        assert_eq!(selector.query(), r#"//*[@id="search-icon-legacy"]"#);

        let grouped = Selector::parse("(//li)[1]").unwrap();
        assert_eq!(grouped.kind(), SelectorKind::XPath);
    }

    #[test]
    fn test_explicit_prefixes() {
        let xpath = Selector::parse("xpath=//ul/li").unwrap();
        assert_eq!(xpath.kind(), SelectorKind::XPath);
        assert_eq!(xpath.query(), "//ul/li");
        assert_eq!(xpath.as_str(), "xpath=//ul/li");

        let css = Selector::css("ul[role=\"listbox\"] > li:first-child").unwrap();
        assert_eq!(css.kind(), SelectorKind::Css);
        assert_eq!(css.query(), "ul[role=\"listbox\"] > li:first-child");
    }

    #[test]
    fn test_rejects_empty() {
        assert!(Selector::parse("").is_err());
        assert!(Selector::parse("   ").is_err());
        assert!(Selector::parse("xpath=").is_err());
        assert!(Selector::parse("css=  ").is_err());
    }

    #[test]
    fn test_deserialize_from_string() {
        let selector: Selector = serde_json::from_str("\"h3.title-and-badge\"").unwrap();
        assert_eq!(selector.to_string(), "h3.title-and-badge");

        let invalid: std::result::Result<Selector, _> = serde_json::from_str("\"\"");
        assert!(invalid.is_err());
    }
}
