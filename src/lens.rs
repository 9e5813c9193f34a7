//! Reverse image search over Google Lens.
//!
//! The CSS class names below are whatever Lens currently renders; they are
//! not a stable interface and break whenever the page layout changes.

use crate::browser::{BrowserError, BrowserPage};
use crate::config::LENS_BASE_URL;
use crate::models::CandidateListing;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep, timeout};
use tracing::debug;

const TITLE_MARKER: &str = ".UAiK1e";
const ERROR_MARKER: &str = ".error-message";
const RESULT_MARKER: &str = ".Vd9M6";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

static RESULT: Lazy<Selector> = Lazy::new(|| selector(RESULT_MARKER));
static TITLE: Lazy<Selector> = Lazy::new(|| selector(TITLE_MARKER));
static LINK: Lazy<Selector> = Lazy::new(|| selector(".GZrdsf"));
static PRICE: Lazy<Selector> = Lazy::new(|| selector(".DdKZJb"));

fn selector(raw: &str) -> Selector {
    Selector::parse(raw).unwrap_or_else(|_| panic!("invalid static selector {raw}"))
}

#[derive(Debug, Error)]
pub enum LensError {
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),
    #[error("target element not found, possible error on page")]
    MissingResults,
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

pub fn search_url(image_url: &str) -> String {
    format!(
        "{}/uploadbyurl?url={}",
        *LENS_BASE_URL,
        urlencoding::encode(image_url)
    )
}

/// Loads the Lens results for `image_url` and waits until result cards render.
pub async fn navigate(
    page: &dyn BrowserPage,
    image_url: &str,
    limit: Duration,
) -> Result<(), LensError> {
    timeout(limit, page.goto(&search_url(image_url)))
        .await
        .map_err(|_| LensError::Timeout(limit, "navigation"))??;

    wait_for_any(page, &[TITLE_MARKER, ERROR_MARKER], limit).await?;
    if !page.has_element(TITLE_MARKER).await? {
        return Err(LensError::MissingResults);
    }
    wait_for_any(page, &[RESULT_MARKER], limit).await?;
    debug!(target = "furniflip.lens", image_url, "lens results ready");
    Ok(())
}

/// Polls until one of `selectors` is present. A script failure while Lens
/// redirects counts as not present yet; each check shares the overall bound.
async fn wait_for_any(
    page: &dyn BrowserPage,
    selectors: &[&'static str],
    limit: Duration,
) -> Result<(), LensError> {
    let deadline = Instant::now() + limit;
    loop {
        for selector in selectors {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, page.has_element(selector)).await {
                Ok(Ok(true)) => return Ok(()),
                Ok(Ok(false)) => {}
                Ok(Err(BrowserError::Evaluate(err))) => {
                    debug!(target = "furniflip.lens", selector, error = %err, "page not ready");
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(LensError::Timeout(limit, selectors[0])),
            }
        }
        if Instant::now() >= deadline {
            return Err(LensError::Timeout(limit, selectors[0]));
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Reads the candidates off a page that `navigate` has prepared.
pub async fn scrape(page: &dyn BrowserPage) -> Result<Vec<CandidateListing>, LensError> {
    let html = page.content().await?;
    Ok(parse_candidates(&html))
}

/// Result cards in page order, keeping only those with a title, a link, and a
/// dollar price.
pub fn parse_candidates(html: &str) -> Vec<CandidateListing> {
    let document = Html::parse_document(html);
    document
        .select(&RESULT)
        .filter_map(|card| {
            let title = first_text(card, &TITLE)?;
            let url = card
                .select(&LINK)
                .next()?
                .value()
                .attr("href")?
                .trim()
                .to_string();
            let price = first_text(card, &PRICE)?;
            price.starts_with('$').then_some(CandidateListing { title, url, price })
        })
        .collect()
}

fn first_text(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    card.select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{FakeBrowser, FakeFactory};
    use crate::browser::{PageFactory, PageHandle};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Page whose element checks fail while a redirect is in flight, or never
    /// answer at all.
    struct RedirectingPage {
        inner: PageHandle,
        script_failures: AtomicUsize,
        hang: bool,
    }

    #[async_trait]
    impl BrowserPage for RedirectingPage {
        async fn goto(&self, url: &str) -> Result<(), BrowserError> {
            self.inner.goto(url).await
        }

        async fn has_element(&self, selector: &str) -> Result<bool, BrowserError> {
            if self.hang {
                return std::future::pending().await;
            }
            if self
                .script_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(BrowserError::Evaluate("Execution context was destroyed".into()));
            }
            self.inner.has_element(selector).await
        }

        async fn content(&self) -> Result<String, BrowserError> {
            self.inner.content().await
        }

        async fn close(&self) -> Result<(), BrowserError> {
            self.inner.close().await
        }
    }

    async fn redirecting(
        browser: Arc<FakeBrowser>,
        script_failures: usize,
        hang: bool,
    ) -> RedirectingPage {
        RedirectingPage {
            inner: FakeFactory(browser).new_page().await.unwrap(),
            script_failures: AtomicUsize::new(script_failures),
            hang,
        }
    }

    fn card(title: &str, href: &str, price: &str) -> String {
        format!(
            r#"<div class="Vd9M6"><a class="GZrdsf" href="{href}"><div class="UAiK1e">{title}</div><span class="DdKZJb">{price}</span></a></div>"#
        )
    }

    #[test]
    fn parses_cards_in_page_order_and_filters_prices() {
        let html = format!(
            "<html><body>{}{}{}{}</body></html>",
            card(" Oak Dining Table ", "https://www.wayfair.com/oak", "$320"),
            card("Pine Table", "https://shop.example/pine", "€150"),
            card("Walnut Table", "https://shop.example/walnut", "  $410.00 "),
            r#"<div class="Vd9M6"><div class="UAiK1e">No link</div><span class="DdKZJb">$5</span></div>"#,
        );
        let out = parse_candidates(&html);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title, "Oak Dining Table");
        assert_eq!(out[0].url, "https://www.wayfair.com/oak");
        assert_eq!(out[1].price, "$410.00");
        assert!(out.iter().all(|c| c.price.starts_with('$')));
    }

    #[test]
    fn card_without_price_is_dropped() {
        let html = r#"<div class="Vd9M6"><a class="GZrdsf" href="https://x"><div class="UAiK1e">Chair</div></a></div>"#;
        assert!(parse_candidates(html).is_empty());
    }

    #[test]
    fn search_url_encodes_image_url() {
        let url = search_url("https://cdn.example.com/a b.jpg?x=1");
        assert!(url.ends_with("/uploadbyurl?url=https%3A%2F%2Fcdn.example.com%2Fa%20b.jpg%3Fx%3D1"));
    }

    #[tokio::test]
    async fn navigate_then_scrape_returns_candidates() {
        let browser = Arc::new(FakeBrowser::default());
        browser.serve(
            "sofa.jpg",
            &card("Grey Sofa", "https://www.ikea.com/sofa", "$499"),
        );
        let page = FakeFactory(browser).new_page().await.unwrap();
        navigate(page.as_ref(), "https://cdn.example.com/sofa.jpg", Duration::from_secs(1))
            .await
            .expect("navigate");
        let out = scrape(page.as_ref()).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Grey Sofa");
    }

    #[tokio::test]
    async fn error_marker_aborts_navigation() {
        let browser = Arc::new(FakeBrowser::default());
        browser.serve("broken.jpg", r#"<div class="error-message">nope</div>"#);
        let page = FakeFactory(browser).new_page().await.unwrap();
        let err = navigate(page.as_ref(), "https://cdn.example.com/broken.jpg", Duration::from_secs(1))
            .await
            .expect_err("should fail");
        assert!(matches!(err, LensError::MissingResults));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_markers_time_out() {
        let browser = Arc::new(FakeBrowser::default());
        let page = FakeFactory(browser).new_page().await.unwrap();
        let err = navigate(page.as_ref(), "https://cdn.example.com/slow.jpg", Duration::from_secs(30))
            .await
            .expect_err("should time out");
        assert!(matches!(err, LensError::Timeout(_, _)));
    }

    #[tokio::test(start_paused = true)]
    async fn script_errors_during_redirect_are_retried() {
        let browser = Arc::new(FakeBrowser::default());
        browser.serve("lamp.jpg", &card("Brass Lamp", "https://www.ikea.com/lamp", "$80"));
        let page = redirecting(browser, 3, false).await;
        navigate(&page, "https://cdn.example.com/lamp.jpg", Duration::from_secs(30))
            .await
            .expect("navigate after redirect");
        assert_eq!(scrape(&page).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_element_check_respects_the_bound() {
        let browser = Arc::new(FakeBrowser::default());
        let page = redirecting(browser, 0, true).await;
        let started = Instant::now();
        let err = navigate(&page, "https://cdn.example.com/lamp.jpg", Duration::from_secs(30))
            .await
            .expect_err("should time out");
        assert!(matches!(err, LensError::Timeout(_, _)));
        assert!(started.elapsed() <= Duration::from_secs(31));
    }
}
