use crate::page::{Page, PageResult};
use crate::poller::Observation;
use crate::selector::{ElementHandle, Selector};
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// How `TextContains` compares text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasePolicy {
    #[default]
    Exact,
    CaseInsensitive,
}

impl CasePolicy {
    pub fn contains(&self, haystack: &str, needle: &str) -> bool {
        match self {
            CasePolicy::Exact => haystack.contains(needle),
            CasePolicy::CaseInsensitive => haystack.to_lowercase().contains(&needle.to_lowercase()),
        }
    }
}

/// Expected shape of the page URL
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawUrlPattern", into = "RawUrlPattern")]
pub enum UrlPattern {
    /// Equal after URL normalization (`https://host` == `https://host/`)
    Exact(String),
    /// Regex search anywhere in the URL
    Regex(Regex),
}

impl UrlPattern {
    pub fn exact(url: &str) -> Self {
        UrlPattern::Exact(url.to_string())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::InvalidPattern(format!("Invalid URL regex '{}': {}", pattern, e)))?;
        Ok(UrlPattern::Regex(regex))
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlPattern::Exact(expected) => normalize_url(url) == normalize_url(expected),
            UrlPattern::Regex(regex) => regex.is_match(url),
        }
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlPattern::Exact(url) => write!(f, "{}", url),
            UrlPattern::Regex(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => url.to_string(),
        Err(_) => raw.to_string(),
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawUrlPattern {
    Exact(String),
    Regex(String),
}

impl TryFrom<RawUrlPattern> for UrlPattern {
    type Error = Error;

    fn try_from(raw: RawUrlPattern) -> Result<Self> {
        match raw {
            RawUrlPattern::Exact(url) => Ok(UrlPattern::Exact(url)),
            RawUrlPattern::Regex(pattern) => UrlPattern::regex(&pattern),
        }
    }
}

impl From<UrlPattern> for RawUrlPattern {
    fn from(pattern: UrlPattern) -> Self {
        match pattern {
            UrlPattern::Exact(url) => RawUrlPattern::Exact(url),
            UrlPattern::Regex(regex) => RawUrlPattern::Regex(regex.as_str().to_string()),
        }
    }
}

/// A predicate over observed page state.
///
/// Evaluation only reads the page. Element-based conditions look at the first
/// element the selector matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    UrlMatches(UrlPattern),
    TextContains {
        selector: Selector,
        expected: String,
        #[serde(default)]
        case: CasePolicy,
    },
    CountGreaterThan {
        selector: Selector,
        threshold: usize,
    },
    /// At least one element matches
    Present(Selector),
    Visible(Selector),
    /// Form value (or text, for elements without a value) is empty
    Empty(Selector),
    ValueEquals {
        selector: Selector,
        expected: String,
    },
    AttributeEquals {
        selector: Selector,
        name: String,
        expected: String,
    },
}

impl Condition {
    pub fn description(&self) -> String {
        match self {
            Condition::UrlMatches(pattern) => format!("url to match {}", pattern),
            Condition::TextContains {
                selector,
                expected,
                case,
            } => match case {
                CasePolicy::Exact => format!("text of `{}` to contain {:?}", selector, expected),
                CasePolicy::CaseInsensitive => format!(
                    "text of `{}` to contain {:?} (case-insensitive)",
                    selector, expected
                ),
            },
            Condition::CountGreaterThan {
                selector,
                threshold,
            } => format!("count of `{}` to be greater than {}", selector, threshold),
            Condition::Present(selector) => format!("`{}` to be present", selector),
            Condition::Visible(selector) => format!("`{}` to be visible", selector),
            Condition::Empty(selector) => format!("`{}` to be empty", selector),
            Condition::ValueEquals { selector, expected } => {
                format!("value of `{}` to equal {:?}", selector, expected)
            }
            Condition::AttributeEquals {
                selector,
                name,
                expected,
            } => format!("attribute {} of `{}` to equal {:?}", name, selector, expected),
        }
    }

    /// The expected value, rendered for reports
    pub fn expected(&self) -> String {
        match self {
            Condition::UrlMatches(pattern) => pattern.to_string(),
            Condition::TextContains { expected, .. } => format!("contains {:?}", expected),
            Condition::CountGreaterThan { threshold, .. } => format!("> {}", threshold),
            Condition::Present(_) => "present".to_string(),
            Condition::Visible(_) => "visible".to_string(),
            Condition::Empty(_) => "\"\"".to_string(),
            Condition::ValueEquals { expected, .. }
            | Condition::AttributeEquals { expected, .. } => format!("{:?}", expected),
        }
    }

    pub fn selector(&self) -> Option<&Selector> {
        match self {
            Condition::UrlMatches(_) => None,
            Condition::TextContains { selector, .. }
            | Condition::CountGreaterThan { selector, .. }
            | Condition::Present(selector)
            | Condition::Visible(selector)
            | Condition::Empty(selector)
            | Condition::ValueEquals { selector, .. }
            | Condition::AttributeEquals { selector, .. } => Some(selector),
        }
    }

    /// Evaluate once against `page`
    pub async fn observe(&self, page: &dyn Page) -> PageResult<Observation> {
        match self {
            Condition::UrlMatches(pattern) => {
                let url = page.current_url().await?;
                let satisfied = pattern.matches(&url);
                Ok(Observation { satisfied, observed: url })
            }
            Condition::TextContains {
                selector,
                expected,
                case,
            } => {
                let Some(handle) = first(page, selector).await? else {
                    return Ok(no_match(selector));
                };
                let text = page.text(&handle).await?;
                let satisfied = case.contains(&text, expected);
                Ok(Observation {
                    satisfied,
                    observed: format!("{:?}", text),
                })
            }
            Condition::CountGreaterThan {
                selector,
                threshold,
            } => {
                let count = page.query(selector).await?.len();
                Ok(Observation {
                    satisfied: count > *threshold,
                    observed: count.to_string(),
                })
            }
            Condition::Present(selector) => {
                let count = page.query(selector).await?.len();
                if count > 0 {
                    Ok(Observation::met(format!("{} match(es)", count)))
                } else {
                    Ok(no_match(selector))
                }
            }
            Condition::Visible(selector) => {
                let Some(handle) = first(page, selector).await? else {
                    return Ok(no_match(selector));
                };
                if page.is_visible(&handle).await? {
                    Ok(Observation::met("visible"))
                } else {
                    Ok(Observation::unmet("hidden"))
                }
            }
            Condition::Empty(selector) => {
                let Some(handle) = first(page, selector).await? else {
                    return Ok(no_match(selector));
                };
                let content = match page.value(&handle).await? {
                    Some(value) => value,
                    None => page.text(&handle).await?,
                };
                Ok(Observation {
                    satisfied: content.is_empty(),
                    observed: format!("{:?}", content),
                })
            }
            Condition::ValueEquals { selector, expected } => {
                let Some(handle) = first(page, selector).await? else {
                    return Ok(no_match(selector));
                };
                match page.value(&handle).await? {
                    Some(value) => Ok(Observation {
                        satisfied: &value == expected,
                        observed: format!("{:?}", value),
                    }),
                    None => Ok(Observation::unmet("<element has no value>")),
                }
            }
            Condition::AttributeEquals {
                selector,
                name,
                expected,
            } => {
                let Some(handle) = first(page, selector).await? else {
                    return Ok(no_match(selector));
                };
                match page.attribute(&handle, name).await? {
                    Some(value) => Ok(Observation {
                        satisfied: &value == expected,
                        observed: format!("{:?}", value),
                    }),
                    None => Ok(Observation::unmet(format!("<no attribute {}>", name))),
                }
            }
        }
    }
}

async fn first(page: &dyn Page, selector: &Selector) -> PageResult<Option<ElementHandle>> {
    Ok(page.query(selector).await?.into_iter().next())
}

fn no_match(selector: &Selector) -> Observation {
    Observation::unmet(format!("<no element matches `{}`>", selector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeElement, FakePage};

    fn sel(raw: &str) -> Selector {
        Selector::parse(raw).unwrap()
    }

    #[test]
    fn test_case_policy() {
        assert!(CasePolicy::CaseInsensitive.contains("this is a playwright demo", "PLAYWRIGHT"));
        assert!(!CasePolicy::Exact.contains("this is a playwright demo", "PLAYWRIGHT"));
        assert!(CasePolicy::Exact.contains("Playwright tutorial", "Playwright"));
    }

    #[test]
    fn test_url_exact_normalizes_trailing_slash() {
        let pattern = UrlPattern::exact("https://www.youtube.com");
        assert!(pattern.matches("https://www.youtube.com/"));
        assert!(!pattern.matches("https://www.youtube.com/results?search_query=x"));
    }

    #[test]
    fn test_url_regex() {
        let pattern = UrlPattern::regex(r"results\?search_query=(?i:playwright)\+tutorial").unwrap();
        assert!(pattern.matches("https://www.youtube.com/results?search_query=Playwright+tutorial"));
        assert!(pattern.matches("https://www.youtube.com/results?search_query=playwright+tutorial"));
        assert!(!pattern.matches("https://www.youtube.com/"));
    }

    #[test]
    fn test_url_regex_invalid() {
        assert!(UrlPattern::regex("results(").is_err());
    }

    #[test]
    fn test_condition_deserialize() {
        let json = r#"[
            {"url_matches": {"regex": "results\\?search_query="}},
            {"url_matches": {"exact": "https://www.youtube.com/"}},
            {"text_contains": {"selector": "h3.title-and-badge", "expected": "playwright", "case": "case_insensitive"}},
            {"count_greater_than": {"selector": "ytd-video-renderer", "threshold": 0}},
            {"visible": "ul[role=\"listbox\"]"},
            {"empty": "input#search"},
            {"present": "ytd-video-renderer"}
        ]"#;
        let conditions: Vec<Condition> = serde_json::from_str(json).unwrap();
        assert_eq!(conditions.len(), 7);
        assert!(matches!(
            conditions[2],
            Condition::TextContains { case: CasePolicy::CaseInsensitive, .. }
        ));
        assert_eq!(conditions[4].description(), "`ul[role=\"listbox\"]` to be visible");
    }

    #[test]
    fn test_condition_rejects_bad_regex() {
        let json = r#"{"url_matches": {"regex": "(unclosed"}}"#;
        assert!(serde_json::from_str::<Condition>(json).is_err());
    }

    #[tokio::test]
    async fn test_observe_text_case_insensitive() {
        let page = FakePage::new("https://example.test/")
            .with_element("h3.title", FakeElement::text("this is a playwright demo"));
        let condition = Condition::TextContains {
            selector: sel("h3.title"),
            expected: "PLAYWRIGHT".into(),
            case: CasePolicy::CaseInsensitive,
        };

        let observation = condition.observe(&page).await.unwrap();
        assert!(observation.satisfied);
        assert_eq!(observation.observed, "\"this is a playwright demo\"");
    }

    #[tokio::test]
    async fn test_observe_missing_element_names_selector() {
        let page = FakePage::new("https://example.test/");
        let condition = Condition::Visible(sel("ul[role=listbox]"));

        let observation = condition.observe(&page).await.unwrap();
        assert!(!observation.satisfied);
        assert!(observation.observed.contains("ul[role=listbox]"));
    }

    #[tokio::test]
    async fn test_observe_count() {
        let page = FakePage::new("https://example.test/")
            .with_element("ytd-video-renderer", FakeElement::text("one"))
            .with_element("ytd-video-renderer", FakeElement::text("two"));

        let above_zero = Condition::CountGreaterThan {
            selector: sel("ytd-video-renderer"),
            threshold: 0,
        };
        let above_two = Condition::CountGreaterThan {
            selector: sel("ytd-video-renderer"),
            threshold: 2,
        };

        assert!(above_zero.observe(&page).await.unwrap().satisfied);
        let observation = above_two.observe(&page).await.unwrap();
        assert!(!observation.satisfied);
        assert_eq!(observation.observed, "2");
    }

    #[tokio::test]
    async fn test_observe_empty_uses_value_for_inputs() {
        let page = FakePage::new("https://example.test/")
            .with_element("input#search", FakeElement::input("Playwright"))
            .with_element("p.note", FakeElement::text(""));

        let input_empty = Condition::Empty(sel("input#search"));
        let observation = input_empty.observe(&page).await.unwrap();
        assert!(!observation.satisfied);
        assert_eq!(observation.observed, "\"Playwright\"");

        let text_empty = Condition::Empty(sel("p.note"));
        assert!(text_empty.observe(&page).await.unwrap().satisfied);
    }

    #[tokio::test]
    async fn test_observe_attribute() {
        let page = FakePage::new("https://example.test/").with_element(
            "ul.suggestions",
            FakeElement::text("").with_attribute("role", "listbox"),
        );

        let condition = Condition::AttributeEquals {
            selector: sel("ul.suggestions"),
            name: "role".into(),
            expected: "listbox".into(),
        };
        assert!(condition.observe(&page).await.unwrap().satisfied);

        let missing = Condition::AttributeEquals {
            selector: sel("ul.suggestions"),
            name: "aria-expanded".into(),
            expected: "true".into(),
        };
        let observation = missing.observe(&page).await.unwrap();
        assert!(!observation.satisfied);
        assert_eq!(observation.observed, "<no attribute aria-expanded>");
    }
}
