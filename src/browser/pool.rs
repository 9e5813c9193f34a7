use super::{BLANK_PAGE, BrowserError, PageFactory, PageHandle};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Keeps up to `max_pages` idle tabs warm. Under contention `acquire` opens a
/// fresh tab instead of waiting, so the live page count may exceed the cap
/// until the surplus is released and closed.
pub struct PagePool {
    factory: Arc<dyn PageFactory>,
    idle: Mutex<Vec<PageHandle>>,
    max_pages: usize,
}

impl PagePool {
    pub async fn start(
        factory: Arc<dyn PageFactory>,
        max_pages: usize,
    ) -> Result<Self, BrowserError> {
        let mut idle = Vec::with_capacity(max_pages);
        for _ in 0..max_pages {
            match factory.new_page().await {
                Ok(page) => idle.push(page),
                Err(err) => {
                    error!(target = "furniflip.browser", error = %err, "page pool warmup failed");
                    for page in idle {
                        let _ = page.close().await;
                    }
                    return Err(err);
                }
            }
        }
        info!(target = "furniflip.browser", pages = max_pages, "page pool initialized");
        Ok(Self {
            factory,
            idle: Mutex::new(idle),
            max_pages,
        })
    }

    pub async fn acquire(&self) -> Result<PageHandle, BrowserError> {
        if let Some(page) = self.idle.lock().await.pop() {
            return Ok(page);
        }
        self.factory.new_page().await.map_err(|err| {
            error!(target = "furniflip.browser", error = %err, "failed to create page");
            err
        })
    }

    pub async fn release(&self, page: PageHandle) {
        if self.idle.lock().await.len() >= self.max_pages {
            close_quietly(page).await;
            return;
        }
        if let Err(err) = page.goto(BLANK_PAGE).await {
            warn!(target = "furniflip.browser", error = %err, "page reset failed; discarding");
            close_quietly(page).await;
            return;
        }
        let surplus = {
            let mut idle = self.idle.lock().await;
            if idle.len() < self.max_pages {
                idle.push(page);
                None
            } else {
                Some(page)
            }
        };
        if let Some(page) = surplus {
            close_quietly(page).await;
        }
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Closes every idle page, then the browser itself.
    pub async fn shutdown(&self) {
        let pages: Vec<PageHandle> = self.idle.lock().await.drain(..).collect();
        futures::future::join_all(pages.into_iter().map(close_quietly)).await;
        if let Err(err) = self.factory.close().await {
            warn!(target = "furniflip.browser", error = %err, "browser shutdown failed");
        }
    }
}

async fn close_quietly(page: PageHandle) {
    if let Err(err) = page.close().await {
        warn!(target = "furniflip.browser", error = %err, "page close failed");
    }
}
