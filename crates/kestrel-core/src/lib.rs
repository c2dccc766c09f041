pub mod action;
pub mod assertion;
pub mod condition;
pub mod config;
pub mod error;
pub mod fake;
pub mod locator;
pub mod page;
pub mod poller;
pub mod report;
pub mod scenario;
pub mod selector;
pub mod suite;

pub use error::{Error, FailureReason, PageError, Result, StepError};
pub use page::{Page, PageFactory, PageResult, Viewport};
pub use selector::{ElementHandle, Selector, SelectorKind};
