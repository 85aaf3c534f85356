//! Best stored quote for a piece of text.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::embeddings::EmbeddingClient;
use crate::error::{DecisionError, Result};
use crate::models::SimilarityMatch;
use crate::store::QuoteStore;

#[derive(Clone)]
pub struct SimilarityRetriever {
    embeddings: EmbeddingClient,
    store: Arc<dyn QuoteStore>,
    threshold: f32,
    limit: usize,
}

impl SimilarityRetriever {
    pub fn new(
        embeddings: EmbeddingClient,
        store: Arc<dyn QuoteStore>,
        threshold: f32,
        limit: usize,
    ) -> Self {
        Self {
            embeddings,
            store,
            threshold,
            limit: limit.max(1),
        }
    }

    /// Same retriever over a store session owned by the caller.
    pub async fn session(&self) -> Result<Self> {
        let store = self.store.session().await?;
        Ok(Self {
            store,
            ..self.clone()
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Matches strictly above the threshold, most similar first, at most `limit`.
    pub async fn find_matches(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SimilarityMatch>> {
        let vector = self.embeddings.embed(text, cancel).await?;
        let mut hits = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DecisionError::Cancelled { operation: "query_nearest".to_string() });
            }
            hits = self.store.query_nearest(&vector, self.threshold, self.limit) => hits?,
        };
        hits.retain(|h| h.similarity > self.threshold);
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(self.limit);

        let mut matches = Vec::with_capacity(hits.len());
        for hit in hits {
            let quote = self
                .store
                .get_quote(&hit.quote_id)
                .await?
                .ok_or_else(|| DecisionError::Database {
                    message: format!("chunk references missing quote '{}'", hit.quote_id),
                })?;
            matches.push(SimilarityMatch {
                quote,
                similarity: hit.similarity,
            });
        }
        Ok(matches)
    }

    /// The single best match, or `NoMatchFound` when nothing clears the threshold.
    pub async fn find_best_match(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<SimilarityMatch> {
        let best = self.find_matches(text, cancel).await?.into_iter().next();
        match best {
            Some(m) => {
                debug!(
                    "Best match for '{}': {} ({:.3})",
                    text, m.quote.id, m.similarity
                );
                Ok(m)
            }
            None => Err(DecisionError::NoMatchFound {
                query: text.to_string(),
                threshold: self.threshold,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkHit, EmbeddingChunk, QuoteRecord};
    use crate::retry::RetryPolicy;
    use crate::embeddings::{Embedder, FakeEmbedder};
    use crate::store::InMemoryQuoteStore;
    use async_trait::async_trait;

    fn quote(id: &str) -> QuoteRecord {
        QuoteRecord {
            id: id.into(),
            line: format!("line {id}"),
            character: "C".into(),
            movie: "M".into(),
            year: 2001,
        }
    }

    async fn store_with(texts: &[(&str, &str)]) -> InMemoryQuoteStore {
        let fake = FakeEmbedder::new(Some(32));
        let mut store = InMemoryQuoteStore::new();
        for (id, text) in texts {
            store.insert_quote(quote(id));
            store.insert_chunk(EmbeddingChunk {
                quote_id: id.to_string(),
                content: text.to_string(),
                embedding: fake.embed(text).await.unwrap(),
            });
        }
        store
    }

    fn retriever(store: Arc<dyn QuoteStore>, threshold: f32, limit: usize) -> SimilarityRetriever {
        let client = EmbeddingClient::new(Arc::new(FakeEmbedder::new(Some(32))), RetryPolicy::once());
        SimilarityRetriever::new(client, store, threshold, limit)
    }

    #[tokio::test]
    async fn exact_text_matches_its_own_chunk() {
        let store = store_with(&[("a", "may the force be with you"), ("b", "i'll be back")]).await;
        let r = retriever(Arc::new(store), 0.6, 1);
        let m = r
            .find_best_match("i'll be back", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(m.quote.id, "b");
        assert!(m.similarity > 0.99);
    }

    #[tokio::test]
    async fn nothing_above_threshold_is_no_match() {
        let store = store_with(&[("a", "may the force be with you")]).await;
        let r = retriever(Arc::new(store), 0.99, 1);
        let err = r
            .find_best_match("completely unrelated words", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::NoMatchFound { threshold, .. } if threshold == 0.99));
    }

    struct LooseStore;

    #[async_trait]
    impl QuoteStore for LooseStore {
        async fn query_nearest(&self, _v: &[f32], _t: f32, _l: usize) -> Result<Vec<ChunkHit>> {
            Ok(vec![
                ChunkHit { quote_id: "low".into(), similarity: 0.5 },
                ChunkHit { quote_id: "b".into(), similarity: 0.7 },
                ChunkHit { quote_id: "a".into(), similarity: 0.9 },
                ChunkHit { quote_id: "edge".into(), similarity: 0.6 },
            ])
        }
        async fn get_quote(&self, id: &str) -> Result<Option<QuoteRecord>> {
            Ok(Some(quote(id)))
        }
        async fn session(&self) -> Result<Arc<dyn QuoteStore>> {
            Ok(Arc::new(LooseStore))
        }
    }

    #[tokio::test]
    async fn store_results_are_rechecked() {
        let r = retriever(Arc::new(LooseStore), 0.6, 2);
        let matches = r.find_matches("x", &CancellationToken::new()).await.unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.quote.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(matches.iter().all(|m| m.similarity > 0.6));
    }

    #[tokio::test]
    async fn dangling_chunk_is_a_database_error() {
        let mut store = InMemoryQuoteStore::new();
        let fake = FakeEmbedder::new(Some(32));
        store.insert_chunk(EmbeddingChunk {
            quote_id: "ghost".into(),
            content: "boo".into(),
            embedding: fake.embed("boo").await.unwrap(),
        });
        let r = retriever(Arc::new(store), 0.6, 1);
        let err = r.find_best_match("boo", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DecisionError::Database { .. }));
    }
}
