use crate::cdp_page::{CdpPage, classify};
use crate::{ChromeFinder, Error, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use futures::StreamExt;
use kestrel_core::{Page, PageError, PageFactory, PageResult, Viewport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// How to start Chrome
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Explicit binary; discovered when `None`
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    /// Initial window size
    pub window: Viewport,
    pub no_sandbox: bool,
    /// Upper bound on any single CDP request
    pub request_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            window: Viewport::new(1280, 720),
            no_sandbox: false,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl LaunchOptions {
    /// Extra Chrome command-line arguments
    fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--disable-extensions".to_string(),
            "--disable-popup-blocking".to_string(),
            "--disable-dev-shm-usage".to_string(),
        ];
        if self.headless {
            args.push("--hide-scrollbars".to_string());
            args.push("--mute-audio".to_string());
        }
        args
    }

    fn browser_config(&self, chrome: &Path, profile: &Path) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome)
            .user_data_dir(profile)
            .window_size(self.window.width, self.window.height)
            .request_timeout(self.request_timeout)
            .args(self.build_args());

        if !self.headless {
            builder = builder.with_head();
        }
        if self.no_sandbox {
            builder = builder.no_sandbox();
        }

        builder
            .build()
            .map_err(|e| Error::Browser(format!("Invalid browser configuration: {}", e)))
    }
}

/// A running Chrome instance that hands out isolated pages.
///
/// Every page lives in its own browser context, so cookies and storage are
/// not shared between scenarios.
pub struct BrowserSession {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    _profile: TempDir,
}

impl BrowserSession {
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let chrome = ChromeFinder::new(options.chrome_path.clone()).find()?;
        let profile = tempfile::tempdir()?;
        tracing::info!(
            "Launching Chrome from {} ({})",
            chrome.display(),
            if options.headless { "headless" } else { "headed" }
        );

        let config = options.browser_config(&chrome, profile.path())?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Error::Browser(format!("Failed to launch Chrome: {}", e)))?;

        // The handler must be polled for any CDP command to complete
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("CDP handler event error (continuing): {}", e);
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            handler,
            _profile: profile,
        })
    }

    /// Close Chrome and stop the event handler
    pub async fn shutdown(mut self) -> Result<()> {
        match Arc::get_mut(&mut self.browser) {
            Some(browser) => {
                browser.close().await?;
                tracing::debug!("Chrome closed");
            }
            None => tracing::warn!("Pages still open at shutdown, leaving Chrome to exit on drop"),
        }
        self.handler.abort();
        Ok(())
    }
}

#[async_trait]
impl PageFactory for BrowserSession {
    async fn open(&self) -> PageResult<Box<dyn Page>> {
        let context = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| classify(&e))?;
        let context_id = context.result.browser_context_id.clone();

        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(PageError::Protocol)?;
        let page = self.browser.new_page(params).await.map_err(|e| classify(&e))?;

        tracing::debug!("Opened page in browser context {:?}", context_id);
        Ok(Box::new(CdpPage::new(page, self.browser.clone(), Some(context_id))))
    }
}
