//! Per-image document retrieval over the candidate pages Lens returned.

pub mod loader;
pub mod splitter;
pub mod store;

pub use loader::{DocumentFetcher, HttpFetcher};

use crate::config::InventoryConfig;
use crate::llm::{Embedder, LlmError, Tool, ToolSpec};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use splitter::TextSplitter;
use std::sync::Arc;
use store::MemoryVectorStore;
use thiserror::Error;
use tracing::{debug, info};

pub const TOOL_NAME: &str = "retrieve_item_information";
pub const TOOL_DESCRIPTION: &str = "Search and return information about an item.";

const CHUNK_SIZE: usize = 500;
const CHUNK_OVERLAP: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub page_content: String,
    pub source: String,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("embedding failed: {0}")]
    Embedding(#[from] LlmError),
}

/// Loads `urls`, chunks and embeds their text, and wraps the index as a tool.
/// URLs that fail or time out are skipped; an empty index is still a valid tool.
pub async fn create_retrieval_tool(
    fetcher: &dyn DocumentFetcher,
    embedder: Arc<dyn Embedder>,
    urls: &[String],
    cfg: &InventoryConfig,
) -> Result<RetrievalTool, RetrievalError> {
    let documents = loader::load_documents(
        fetcher,
        urls,
        cfg.fetch_concurrency,
        cfg.document_timeout,
    )
    .await;

    let splitter = TextSplitter::new(CHUNK_SIZE, CHUNK_OVERLAP);
    let chunks: Vec<Document> = documents
        .iter()
        .flat_map(|doc| {
            splitter
                .split_text(&doc.page_content)
                .into_iter()
                .map(|chunk| Document {
                    page_content: chunk,
                    source: doc.source.clone(),
                })
        })
        .collect();

    let store =
        MemoryVectorStore::from_documents(chunks, embedder.as_ref(), cfg.embedding_batch_size)
            .await?;
    info!(
        target = "furniflip.retrieval",
        urls = urls.len(),
        documents = documents.len(),
        chunks = store.len(),
        "retrieval index built"
    );
    Ok(RetrievalTool {
        store,
        embedder,
        top_k: cfg.retrieval_top_k.max(1),
    })
}

pub struct RetrievalTool {
    store: MemoryVectorStore,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct RetrievalArgs {
    query: String,
}

impl RetrievalTool {
    pub fn chunk_count(&self) -> usize {
        self.store.len()
    }

    pub async fn search(&self, query: &str) -> Result<String, RetrievalError> {
        if self.store.is_empty() {
            return Ok(String::new());
        }
        let vector = self.embedder.embed_query(query).await?;
        let hits = self.store.similarity_search(&vector, self.top_k);
        debug!(target = "furniflip.retrieval", query, hits = hits.len(), "retrieval search");
        Ok(hits
            .iter()
            .map(|doc| doc.page_content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[async_trait]
impl Tool for RetrievalTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_NAME.to_string(),
            description: TOOL_DESCRIPTION.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "What to look up about the item"}
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String, LlmError> {
        let args: RetrievalArgs = serde_json::from_value(arguments)
            .map_err(|err| LlmError::Tool(TOOL_NAME.to_string(), err.to_string()))?;
        self.search(&args.query).await.map_err(|err| match err {
            RetrievalError::Embedding(inner) => inner,
            other => LlmError::Tool(TOOL_NAME.to_string(), other.to_string()),
        })
    }
}
