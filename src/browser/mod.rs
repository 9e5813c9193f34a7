pub mod pool;

pub use pool::PagePool;

use crate::config;
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use thiserror::Error;
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{info, warn};

pub const BLANK_PAGE: &str = "about:blank";

const LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-accelerated-2d-canvas",
    "--no-first-run",
    "--no-zygote",
    "--disable-gpu",
];

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("page creation failed: {0}")]
    NewPage(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("page script failed: {0}")]
    Evaluate(String),
    #[error("browser closed")]
    Closed,
}

/// One browser tab. A handle is owned by exactly one task at a time.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;
    async fn has_element(&self, selector: &str) -> Result<bool, BrowserError>;
    async fn content(&self) -> Result<String, BrowserError>;
    async fn close(&self) -> Result<(), BrowserError>;
}

pub type PageHandle = Box<dyn BrowserPage>;

#[async_trait]
pub trait PageFactory: Send + Sync {
    async fn new_page(&self) -> Result<PageHandle, BrowserError>;
    async fn close(&self) -> Result<(), BrowserError>;
}

/// Shared headless Chromium process.
pub struct ChromiumBrowser {
    browser: RwLock<Option<Browser>>,
    handler: JoinHandle<()>,
}

impl ChromiumBrowser {
    pub async fn launch() -> Result<Self, BrowserError> {
        let mut builder = BrowserConfig::builder().args(LAUNCH_ARGS.iter().copied());
        if config::is_dev() {
            builder = builder.with_head();
        }
        if let Ok(path) = std::env::var("CHROME_PATH")
            && !path.trim().is_empty()
        {
            builder = builder.chrome_executable(path);
        }
        let browser_cfg = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(browser_cfg)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        info!(target = "furniflip.browser", headless = !config::is_dev(), "browser initialized");
        Ok(Self {
            browser: RwLock::new(Some(browser)),
            handler,
        })
    }
}

#[async_trait]
impl PageFactory for ChromiumBrowser {
    async fn new_page(&self) -> Result<PageHandle, BrowserError> {
        let guard = self.browser.read().await;
        let browser = guard.as_ref().ok_or(BrowserError::Closed)?;
        let page = browser
            .new_page(BLANK_PAGE)
            .await
            .map_err(|err| BrowserError::NewPage(err.to_string()))?;
        Ok(Box::new(ChromiumPage { page }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let Some(mut browser) = self.browser.write().await.take() else {
            return Ok(());
        };
        if let Err(err) = browser.close().await {
            warn!(target = "furniflip.browser", error = %err, "browser close failed");
        }
        let _ = browser.wait().await;
        self.handler.abort();
        info!(target = "furniflip.browser", "browser closed");
        Ok(())
    }
}

struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.page
            .goto(url)
            .await
            .map_err(|err| BrowserError::Navigation(err.to_string()))?;
        // Settles client-side redirects; the caller bounds the overall wait.
        let _ = self.page.wait_for_navigation().await;
        Ok(())
    }

    async fn has_element(&self, selector: &str) -> Result<bool, BrowserError> {
        let literal = serde_json::to_string(selector)
            .map_err(|err| BrowserError::Evaluate(err.to_string()))?;
        let script = format!("document.querySelector({literal}) !== null");
        self.page
            .evaluate(script)
            .await
            .map_err(|err| BrowserError::Evaluate(err.to_string()))?
            .into_value::<bool>()
            .map_err(|err| BrowserError::Evaluate(err.to_string()))
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.page
            .content()
            .await
            .map_err(|err| BrowserError::Evaluate(err.to_string()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|err| BrowserError::Evaluate(err.to_string()))
    }
}
