use super::Document;
use crate::llm::{Embedder, LlmError};

/// Brute-force cosine index. Lives only as long as one image's processing.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    entries: Vec<(Document, Vec<f32>)>,
}

impl MemoryVectorStore {
    /// Embeds the documents `batch_size` at a time so a single request stays
    /// under the provider's input cap.
    pub async fn from_documents(
        documents: Vec<Document>,
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<Self, LlmError> {
        if documents.is_empty() {
            return Ok(Self::default());
        }
        let texts: Vec<String> = documents.iter().map(|d| d.page_content.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size.max(1)) {
            vectors.extend(embedder.embed_documents(batch).await?);
        }
        if vectors.len() != documents.len() {
            return Err(LlmError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                documents.len(),
                vectors.len()
            )));
        }
        Ok(Self {
            entries: documents.into_iter().zip(vectors).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top `k` documents by descending similarity; ties keep insertion order.
    pub fn similarity_search(&self, query: &[f32], k: usize) -> Vec<&Document> {
        let mut scored: Vec<(f32, &Document)> = self
            .entries
            .iter()
            .map(|(doc, vector)| (cosine_similarity(query, vector), doc))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().take(k).map(|(_, doc)| doc).collect()
    }
}

/// Returns 0.0 for zero-norm or mismatched inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::testing::FakeEmbedder;

    fn doc(text: &str) -> Document {
        Document {
            page_content: text.into(),
            source: "https://x".into(),
        }
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn search_orders_by_similarity() {
        let store = MemoryVectorStore {
            entries: vec![
                (doc("east"), vec![1.0, 0.0]),
                (doc("north"), vec![0.0, 1.0]),
                (doc("north-east"), vec![0.7, 0.7]),
            ],
        };
        let hits = store.similarity_search(&[0.1, 1.0], 2);
        let texts: Vec<&str> = hits.iter().map(|d| d.page_content.as_str()).collect();
        assert_eq!(texts, vec!["north", "north-east"]);
    }

    #[tokio::test]
    async fn embeds_in_capped_batches_and_keeps_order() {
        let embedder = FakeEmbedder::new(&["oak", "pine"]);
        let docs: Vec<Document> = (0..1200)
            .map(|i| doc(if i == 1100 { "pine pine" } else { "oak" }))
            .collect();

        let store = MemoryVectorStore::from_documents(docs, &embedder, 512)
            .await
            .unwrap();

        assert_eq!(store.len(), 1200);
        assert_eq!(*embedder.batch_sizes.lock().unwrap(), vec![512, 512, 176]);
        let hits = store.similarity_search(&[0.0, 1.0], 1);
        assert_eq!(hits[0].page_content, "pine pine");
    }
}
