use super::{Document, RetrievalError};
use crate::http::build_fetch_client;
use crate::metrics;
use async_trait::async_trait;
use futures::{StreamExt, stream};
use reqwest::Client;
use scraper::{Html, Node, Selector};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Raw page body for `url`.
    async fn fetch(&self, url: &str) -> Result<String, RetrievalError>;
}

pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            http: build_fetch_client(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, RetrievalError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| RetrievalError::Fetch(err.to_string()))?;
        if !response.status().is_success() {
            return Err(RetrievalError::Fetch(format!("HTTP {}", response.status())));
        }
        response
            .text()
            .await
            .map_err(|err| RetrievalError::Fetch(err.to_string()))
    }
}

/// Fetches every URL with at most `concurrency` requests in flight. A URL
/// that fails or outlives `per_fetch` contributes nothing.
pub async fn load_documents(
    fetcher: &dyn DocumentFetcher,
    urls: &[String],
    concurrency: usize,
    per_fetch: Duration,
) -> Vec<Document> {
    let fetches: Vec<_> = urls
        .iter()
        .map(|url| load_one(fetcher, url, per_fetch))
        .collect();
    let loaded: Vec<Option<Document>> = stream::iter(fetches)
        .buffered(concurrency.max(1))
        .collect()
        .await;
    loaded.into_iter().flatten().collect()
}

async fn load_one(fetcher: &dyn DocumentFetcher, url: &str, per_fetch: Duration) -> Option<Document> {
    let html = match timeout(per_fetch, fetcher.fetch(url)).await {
        Ok(Ok(html)) => html,
        Ok(Err(err)) => {
            warn!(target = "furniflip.retrieval", url, error = %err, "failed to load url");
            metrics::document_dropped("error");
            return None;
        }
        Err(_) => {
            warn!(target = "furniflip.retrieval", url, timeout_ms = per_fetch.as_millis() as u64, "failed to load url: timeout");
            metrics::document_dropped("timeout");
            return None;
        }
    };
    let text = html_to_text(&html);
    if text.is_empty() {
        debug!(target = "furniflip.retrieval", url, "page had no text");
        return None;
    }
    Some(Document {
        page_content: text,
        source: url.to_string(),
    })
}

/// Visible body text, one line per text node.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let body = Selector::parse("body").ok();
    let root = body
        .as_ref()
        .and_then(|sel| document.select(sel).next())
        .map(|el| *el)
        .unwrap_or_else(|| document.tree.root());

    root.descendants()
        .filter_map(|node| {
            let Node::Text(text) = node.value() else {
                return None;
            };
            let hidden = node.ancestors().any(|parent| {
                parent
                    .value()
                    .as_element()
                    .is_some_and(|el| SKIPPED_TAGS.contains(&el.name()))
            });
            let trimmed = text.trim();
            (!hidden && !trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    /// Serves canned HTML; URLs listed in `slow` never answer in time.
    #[derive(Default)]
    pub struct FakeFetcher {
        pub pages: HashMap<String, String>,
        pub slow: Vec<String>,
    }

    #[async_trait]
    impl DocumentFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<String, RetrievalError> {
            if self.slow.iter().any(|u| u == url) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| RetrievalError::Fetch(format!("HTTP 404 for {url}")))
        }
    }
}
