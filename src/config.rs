use crate::http::{env_secs, env_usize};
use once_cell::sync::Lazy;
use std::{env, time::Duration};

pub static ENVIRONMENT: Lazy<String> =
    Lazy::new(|| env::var("ENVIRONMENT").unwrap_or_else(|_| "production".to_string()));

pub static LENS_BASE_URL: Lazy<String> = Lazy::new(|| {
    env::var("LENS_BASE_URL")
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| "https://lens.google.com".to_string())
});

const DEFAULT_PREFERRED_HOSTS: &[&str] = &[
    "wayfair.com",
    "ikea.com",
    "westelm.com",
    "potterybarn.com",
    "crateandbarrel.com",
    "article.com",
    "cb2.com",
    "overstock.com",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Ask the model for a JSON object, fall back to label scanning.
    Structured,
    /// Labelled `name: value` block only.
    Text,
}

impl ExtractionMode {
    fn from_env() -> Self {
        match env::var("EXTRACTION_MODE")
            .unwrap_or_default()
            .trim()
            .to_lowercase()
            .as_str()
        {
            "text" => Self::Text,
            _ => Self::Structured,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InventoryConfig {
    pub concurrency: usize,
    pub page_pool_size: usize,
    pub fetch_concurrency: usize,
    pub navigation_timeout: Duration,
    pub document_timeout: Duration,
    pub max_candidates: usize,
    pub retrieval_top_k: usize,
    /// Chunks per embeddings request.
    pub embedding_batch_size: usize,
    pub agent_max_iterations: usize,
    pub preferred_hosts: Vec<String>,
    pub extraction_mode: ExtractionMode,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            page_pool_size: 5,
            fetch_concurrency: 5,
            navigation_timeout: Duration::from_secs(30),
            document_timeout: Duration::from_secs(5),
            max_candidates: 20,
            retrieval_top_k: 4,
            embedding_batch_size: 512,
            agent_max_iterations: 15,
            preferred_hosts: DEFAULT_PREFERRED_HOSTS
                .iter()
                .map(|h| h.to_string())
                .collect(),
            extraction_mode: ExtractionMode::Structured,
        }
    }
}

impl InventoryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: env_usize("INVENTORY_CONCURRENCY", defaults.concurrency),
            page_pool_size: env_usize("PAGE_POOL_SIZE", defaults.page_pool_size),
            fetch_concurrency: env_usize("FETCH_CONCURRENCY", defaults.fetch_concurrency),
            navigation_timeout: Duration::from_secs(env_secs("NAVIGATION_TIMEOUT_SECS", 30)),
            document_timeout: Duration::from_secs(env_secs("DOCUMENT_TIMEOUT_SECS", 5)),
            max_candidates: env_usize("MAX_CANDIDATES", defaults.max_candidates),
            retrieval_top_k: env_usize("RETRIEVAL_TOP_K", defaults.retrieval_top_k),
            embedding_batch_size: env_usize(
                "EMBEDDING_BATCH_SIZE",
                defaults.embedding_batch_size,
            ),
            agent_max_iterations: env_usize(
                "AGENT_MAX_ITERATIONS",
                defaults.agent_max_iterations,
            ),
            preferred_hosts: env::var("PREFERRED_HOSTS")
                .ok()
                .map(|raw| parse_host_list(&raw))
                .filter(|hosts| !hosts.is_empty())
                .unwrap_or(defaults.preferred_hosts),
            extraction_mode: ExtractionMode::from_env(),
        }
    }
}

pub fn is_dev() -> bool {
    ENVIRONMENT.eq_ignore_ascii_case("dev")
}

pub fn max_images_allowed() -> usize {
    env_usize("MAX_IMAGES", 20)
}

fn parse_host_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|h| h.trim().trim_start_matches("www.").to_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_list_normalizes_entries() {
        let hosts = parse_host_list(" www.Wayfair.com, ,ikea.com ");
        assert_eq!(hosts, vec!["wayfair.com", "ikea.com"]);
    }

    #[test]
    fn defaults_match_pipeline_limits() {
        let cfg = InventoryConfig::default();
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.page_pool_size, 5);
        assert_eq!(cfg.max_candidates, 20);
        assert_eq!(cfg.embedding_batch_size, 512);
        assert_eq!(cfg.document_timeout, Duration::from_secs(5));
        assert_eq!(cfg.navigation_timeout, Duration::from_secs(30));
    }
}
