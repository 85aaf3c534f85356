#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};

use decisionator::config::Config;
use decisionator::embeddings::Embedder;
use decisionator::error::{DecisionError, Result};
use decisionator::generation::{Generator, StructuredSchema};
use decisionator::models::{ChunkHit, EmbeddingChunk, QuoteRecord};
use decisionator::pipeline::DecisionFrame;
use decisionator::store::{InMemoryQuoteStore, QuoteStore};

/// Embeds known texts to fixed vectors; everything else gets `fallback`.
pub struct MapEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
    fail: bool,
    pub calls: AtomicU32,
}

impl MapEmbedder {
    pub fn new(fallback: Vec<f32>) -> Self {
        Self {
            vectors: HashMap::new(),
            fallback,
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Every call fails like an unavailable service.
    pub fn failing(dims: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(vec![0.0; dims])
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for MapEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DecisionError::Embedding {
                message: "503 service unavailable".to_string(),
            });
        }
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }

    fn dimensions(&self) -> usize {
        self.fallback.len()
    }
}

/// Answers each pipeline schema with a canned reply.
pub struct ScriptedGenerator {
    options: Value,
    persona: String,
    dialog: String,
    transient_failures: Mutex<u32>,
    garbled: bool,
    pub calls: AtomicU32,
    pub prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedGenerator {
    pub fn new(options: &[(&str, &str)]) -> Self {
        let options: Vec<Value> = options
            .iter()
            .map(|(title, justification)| json!({"title": title, "justification": justification}))
            .collect();
        Self {
            options: json!({ "options": options }),
            persona: "Listen here, you take that job.".to_string(),
            dialog: "Go ahead, take the job.".to_string(),
            transient_failures: Mutex::new(0),
            garbled: false,
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Fail the first `n` calls with a transport error.
    pub fn flaky(self, n: u32) -> Self {
        *self.transient_failures.lock().unwrap() = n;
        self
    }

    /// Every reply is prose instead of JSON.
    pub fn garbled(mut self) -> Self {
        self.garbled = true;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts_for(&self, schema: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == schema)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate_structured(&self, prompt: &str, schema: &StructuredSchema) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.garbled {
            return Err(DecisionError::Parse {
                message: "content is not valid JSON: expected value at line 1 column 1".to_string(),
            });
        }
        {
            let mut remaining = self.transient_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DecisionError::Generation {
                    message: "502 bad gateway".to_string(),
                });
            }
        }
        self.prompts
            .lock()
            .unwrap()
            .push((schema.name.to_string(), prompt.to_string()));
        match schema.name {
            "decision_options" => Ok(self.options.clone()),
            "persona_rewrite" => Ok(json!({ "justification": self.persona })),
            "merged_dialog" => Ok(json!({ "dialog": self.dialog })),
            other => Err(DecisionError::Parse {
                message: format!("unexpected schema {other}"),
            }),
        }
    }
}

pub fn quote(id: &str, line: &str, character: &str, movie: &str, year: i32) -> QuoteRecord {
    QuoteRecord {
        id: id.to_string(),
        line: line.to_string(),
        character: character.to_string(),
        movie: movie.to_string(),
        year,
    }
}

/// One chunk per quote, holding the whole line.
pub fn store(entries: &[(QuoteRecord, Vec<f32>)]) -> InMemoryQuoteStore {
    let mut store = InMemoryQuoteStore::new();
    for (quote, embedding) in entries {
        store.insert_chunk(EmbeddingChunk {
            quote_id: quote.id.clone(),
            content: quote.line.clone(),
            embedding: embedding.clone(),
        });
        store.insert_quote(quote.clone());
    }
    store
}

/// Counts sessions opened and still held over an in-memory corpus.
#[derive(Clone, Default)]
pub struct CountingStore {
    inner: InMemoryQuoteStore,
    pub opened: Arc<AtomicU32>,
    pub live: Arc<AtomicU32>,
}

impl CountingStore {
    pub fn new(inner: InMemoryQuoteStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> u32 {
        self.live.load(Ordering::SeqCst)
    }
}

struct CountedSession {
    inner: InMemoryQuoteStore,
    live: Arc<AtomicU32>,
}

impl Drop for CountedSession {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuoteStore for CountingStore {
    async fn query_nearest(&self, vector: &[f32], threshold: f32, limit: usize) -> Result<Vec<ChunkHit>> {
        self.inner.query_nearest(vector, threshold, limit).await
    }

    async fn get_quote(&self, id: &str) -> Result<Option<QuoteRecord>> {
        self.inner.get_quote(id).await
    }

    async fn session(&self) -> Result<Arc<dyn QuoteStore>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CountedSession {
            inner: self.inner.clone(),
            live: self.live.clone(),
        }))
    }
}

#[async_trait]
impl QuoteStore for CountedSession {
    async fn query_nearest(&self, vector: &[f32], threshold: f32, limit: usize) -> Result<Vec<ChunkHit>> {
        self.inner.query_nearest(vector, threshold, limit).await
    }

    async fn get_quote(&self, id: &str) -> Result<Option<QuoteRecord>> {
        self.inner.get_quote(id).await
    }

    async fn session(&self) -> Result<Arc<dyn QuoteStore>> {
        self.inner.session().await
    }
}

/// Default knobs with a deadline long enough for a full backoff schedule.
pub fn config() -> Config {
    let mut config = Config::default();
    config.runtime.request_timeout_ms = 100_000_000;
    config
}

pub async fn collect(frames: impl Stream<Item = DecisionFrame>) -> Vec<DecisionFrame> {
    frames.collect().await
}
