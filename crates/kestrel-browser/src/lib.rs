//! Chrome backend for kestrel: finds and launches Chrome, and implements
//! the engine's `Page`/`PageFactory` over the DevTools Protocol.

mod cdp_page;
mod chrome_finder;
mod error;
mod launcher;

pub use cdp_page::CdpPage;
pub use chrome_finder::ChromeFinder;
pub use error::{Error, Result};
pub use launcher::{BrowserSession, LaunchOptions};
