use crate::agent;
use crate::browser::{BrowserPage, PagePool};
use crate::config::{InventoryConfig, max_images_allowed};
use crate::lens;
use crate::llm::{ChatModel, Embedder};
use crate::matcher;
use crate::metrics;
use crate::models::{ImagesSource, InventoryInfo};
use crate::retrieval::{self, DocumentFetcher};
use crate::supabase::VocabularySource;
use futures::{StreamExt, stream};
use std::{collections::HashSet, fmt::Display, future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{debug, error, info};

/// Turns image URLs into enriched inventory records.
#[derive(Clone)]
pub struct InventoryPipeline {
    pool: Arc<PagePool>,
    vocabulary: Arc<dyn VocabularySource>,
    model: Arc<dyn ChatModel>,
    embedder: Arc<dyn Embedder>,
    fetcher: Arc<dyn DocumentFetcher>,
    config: Arc<InventoryConfig>,
}

impl InventoryPipeline {
    pub fn new(
        pool: Arc<PagePool>,
        vocabulary: Arc<dyn VocabularySource>,
        model: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        fetcher: Arc<dyn DocumentFetcher>,
        config: InventoryConfig,
    ) -> Self {
        Self {
            pool,
            vocabulary,
            model,
            embedder,
            fetcher,
            config: Arc::new(config),
        }
    }

    /// Processes every image with bounded concurrency. Only a vocabulary
    /// lookup failure fails the whole run; a failing image is logged and left
    /// out. Records come back in completion order.
    pub async fn inventory_agent(
        &self,
        image_urls: &[String],
    ) -> Result<Vec<InventoryInfo>, PipelineError> {
        let started = Instant::now();
        let (categories, conditions) = tokio::try_join!(
            self.vocabulary.get_types("category"),
            self.vocabulary.get_types("condition"),
        )
        .map_err(|err| PipelineError::internal("vocabulary", err.to_string()))?;
        metrics::stage_elapsed("vocabulary", started.elapsed().as_millis());

        let tasks: Vec<_> = image_urls
            .iter()
            .map(|url| self.process_image(url, &categories, &conditions))
            .collect();
        let outcomes: Vec<Option<InventoryInfo>> = stream::iter(tasks)
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        let items: Vec<InventoryInfo> = outcomes.into_iter().flatten().collect();

        let idle_pages = self.pool.idle_count().await;
        info!(
            target = "furniflip.inventory",
            submitted = image_urls.len(),
            produced = items.len(),
            idle_pages,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "inventory run finished"
        );
        Ok(items)
    }

    async fn process_image(
        &self,
        image_url: &str,
        categories: &[String],
        conditions: &[String],
    ) -> Option<InventoryInfo> {
        let outcome = match self.pool.acquire().await {
            Ok(page) => {
                let result = self
                    .process_with_page(page.as_ref(), image_url, categories, conditions)
                    .await;
                self.pool.release(page).await;
                result
            }
            Err(err) => Err(PipelineError::internal("acquire_page", err.to_string())),
        };

        match outcome {
            Ok(info) => Some(info),
            Err(err) => {
                error!(
                    target = "furniflip.inventory",
                    image_url,
                    stage = err.stage(),
                    error = %err.detail(),
                    "error processing image url"
                );
                metrics::image_failed(err.stage());
                None
            }
        }
    }

    async fn process_with_page(
        &self,
        page: &dyn BrowserPage,
        image_url: &str,
        categories: &[String],
        conditions: &[String],
    ) -> Result<InventoryInfo, PipelineError> {
        let cfg = self.config.as_ref();

        capture_stage("navigate", lens::navigate(page, image_url, cfg.navigation_timeout)).await?;
        let scraped = capture_stage("scrape", lens::scrape(page)).await?;
        let candidates = &scraped[..scraped.len().min(cfg.max_candidates)];

        let urls: Vec<String> = candidates.iter().map(|c| c.url.clone()).collect();
        let tool = capture_stage(
            "retrieve",
            retrieval::create_retrieval_tool(self.fetcher.as_ref(), self.embedder.clone(), &urls, cfg),
        )
        .await?;
        debug!(
            target = "furniflip.inventory",
            image_url,
            candidates = candidates.len(),
            chunks = tool.chunk_count(),
            "retrieval ready"
        );

        let extraction = capture_stage(
            "extract",
            agent::extract_item(
                self.model.as_ref(),
                &tool,
                image_url,
                &scraped,
                categories,
                conditions,
                cfg,
            ),
        )
        .await?;

        let mut info = extraction.info;
        info.image_url = image_url.to_string();
        info.similar_url =
            matcher::find_similar_url(&info.name, &info.price, candidates, &cfg.preferred_hosts);
        Ok(info)
    }
}

async fn capture_stage<T, E, Fut>(name: &'static str, fut: Fut) -> Result<T, PipelineError>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let started = Instant::now();
    let result = fut.await;
    metrics::stage_elapsed(name, started.elapsed().as_millis());
    result.map_err(|err| PipelineError::internal(name, err.to_string()))
}

/// Normalizes request image URLs: a single string may hold several URLs
/// separated by whitespace, array entries are kept whole. Trims, drops
/// duplicates, and requires 1..=MAX_IMAGES http(s) URLs.
pub fn resolve_images(source: ImagesSource) -> Result<Vec<String>, PipelineError> {
    let entries: Vec<String> = match source {
        ImagesSource::Single(value) => value.split_whitespace().map(str::to_string).collect(),
        ImagesSource::Multiple(values) => values
            .iter()
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect(),
    };
    let mut seen = HashSet::new();
    let resolved: Vec<String> = entries
        .into_iter()
        .filter(|entry| seen.insert(entry.clone()))
        .collect();

    if resolved.is_empty() {
        return Err(PipelineError::invalid_input("resolve_images", "no images provided"));
    }
    if resolved.len() > max_images_allowed() {
        return Err(PipelineError::invalid_input("resolve_images", "too_many_images"));
    }
    for url in &resolved {
        let parsed = reqwest::Url::parse(url).map_err(|_| {
            PipelineError::invalid_input("resolve_images", format!("invalid_image_url: {url}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PipelineError::invalid_input(
                "resolve_images",
                format!("unsupported_url_scheme: {url}"),
            ));
        }
    }
    Ok(resolved)
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Unauthorized,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::InvalidInput)
    }

    pub fn unauthorized(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::Unauthorized)
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::Internal)
    }

    fn new(stage: &'static str, message: impl Into<String>, kind: PipelineErrorKind) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}
