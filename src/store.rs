//! Read access to the indexed quote corpus.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{DecisionError, Result};
use crate::models::{ChunkHit, EmbeddingChunk, QuoteRecord};
use crate::schema::{self, CHUNKS_TABLE, HnswParams, QUOTES_TABLE};
use crate::utils::cosine_similarity;

/// Nearest-neighbour search plus row lookup over stored quotes.
#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// Chunks with cosine similarity strictly above `threshold`, most similar first, at most `limit`.
    async fn query_nearest(
        &self,
        vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ChunkHit>>;

    async fn get_quote(&self, id: &str) -> Result<Option<QuoteRecord>>;

    /// A handle owned by one request and released when dropped. Concurrent
    /// requests never share a session.
    async fn session(&self) -> Result<Arc<dyn QuoteStore>>;
}

/// Where and as whom to connect.
#[derive(Clone)]
struct ConnectOptions {
    url: String,
    user: String,
    pass: String,
    ns: String,
    db: String,
}

impl ConnectOptions {
    fn from_config(config: &Config) -> Self {
        Self {
            url: config.system.database_url.clone(),
            user: config.runtime.database_user.clone(),
            pass: config.runtime.database_pass.clone(),
            ns: config.system.database_ns.clone(),
            db: config.system.database_db.clone(),
        }
    }
}

/// SurrealDB-backed store over WebSocket
pub struct SurrealQuoteStore {
    db: Surreal<Client>,
    options: ConnectOptions,
}

// SurrealDB's Ws engine expects host:port without a scheme
fn normalize_ws_url(s: &str) -> String {
    s.strip_prefix("ws://")
        .or_else(|| s.strip_prefix("wss://"))
        .or_else(|| s.strip_prefix("http://"))
        .or_else(|| s.strip_prefix("https://"))
        .unwrap_or(s)
        .to_string()
}

#[derive(Debug, Deserialize)]
struct HitRow {
    quote_id: String,
    similarity: f32,
}

impl SurrealQuoteStore {
    pub async fn connect(config: &Config) -> Result<Self> {
        let options = ConnectOptions::from_config(config);
        info!("Connecting to SurrealDB at {}", normalize_ws_url(&options.url));
        Self::open(options).await
    }

    async fn open(options: ConnectOptions) -> Result<Self> {
        let url = normalize_ws_url(&options.url);
        let db = Surreal::new::<Ws>(url)
            .await
            .map_err(|e| DecisionError::Database {
                message: format!("Failed to connect to SurrealDB at {}: {}", options.url, e),
            })?;

        db.signin(surrealdb::opt::auth::Root {
            username: options.user.as_str(),
            password: options.pass.as_str(),
        })
        .await
        .map_err(|e| DecisionError::Database {
            message: format!(
                "Failed to authenticate with SurrealDB as user '{}': {}",
                options.user, e
            ),
        })?;

        db.use_ns(&options.ns).use_db(&options.db).await?;
        Ok(Self { db, options })
    }

    /// Define tables and the HNSW index. Idempotent.
    pub async fn ensure_schema(&self, dim: usize, hnsw: HnswParams) -> Result<()> {
        info!(
            "Defining quote schema (dim={}, M={}, EFC={})",
            dim, hnsw.m, hnsw.efc
        );
        self.db.query(schema::definitions(dim, hnsw)).await?.check()?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.db
            .query(format!("DELETE {CHUNKS_TABLE}; DELETE {QUOTES_TABLE};"))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn upsert_quote(&self, quote: &QuoteRecord, tag: Option<&str>) -> Result<()> {
        self.db
            .query(
                "UPSERT type::thing($table, $id) CONTENT {
                    line: $line, character: $character, movie: $movie, year: $year,
                    tag: $tag, ingested_at: time::now()
                }",
            )
            .bind(("table", QUOTES_TABLE))
            .bind(("id", quote.id.clone()))
            .bind(("line", quote.line.clone()))
            .bind(("character", quote.character.clone()))
            .bind(("movie", quote.movie.clone()))
            .bind(("year", quote.year))
            .bind(("tag", tag.map(str::to_string)))
            .await?
            .check()?;
        Ok(())
    }

    /// Drop a quote's chunks so re-ingesting it does not duplicate them.
    pub async fn delete_chunks_for(&self, quote_id: &str) -> Result<()> {
        self.db
            .query(format!(
                "DELETE {CHUNKS_TABLE} WHERE quote = type::thing($quotes, $quote_id)"
            ))
            .bind(("quotes", QUOTES_TABLE))
            .bind(("quote_id", quote_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn insert_chunk(&self, chunk: &EmbeddingChunk) -> Result<()> {
        self.db
            .query(
                "CREATE type::table($table) CONTENT {
                    quote: type::thing($quotes, $quote_id), content: $content, embedding: $embedding
                }",
            )
            .bind(("table", CHUNKS_TABLE))
            .bind(("quotes", QUOTES_TABLE))
            .bind(("quote_id", chunk.quote_id.clone()))
            .bind(("content", chunk.content.clone()))
            .bind(("embedding", chunk.embedding.clone()))
            .await?
            .check()?;
        Ok(())
    }
}

#[async_trait]
impl QuoteStore for SurrealQuoteStore {
    async fn query_nearest(
        &self,
        vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let sql = format!(
            "SELECT meta::id(quote) AS quote_id, vector::similarity::cosine(embedding, $q) AS similarity
             FROM {CHUNKS_TABLE}
             WHERE embedding <|{limit},{ef}|> $q AND vector::similarity::cosine(embedding, $q) > $threshold
             ORDER BY similarity DESC
             LIMIT $limit",
            ef = HnswParams::ef_search(limit),
        );
        debug!("Nearest-chunk query (limit={}, threshold={})", limit, threshold);
        let mut resp = self
            .db
            .query(sql)
            .bind(("q", vector.to_vec()))
            .bind(("threshold", threshold))
            .bind(("limit", limit as i64))
            .await?;
        let rows: Vec<HitRow> = resp.take(0)?;
        Ok(rows
            .into_iter()
            .map(|r| ChunkHit {
                quote_id: r.quote_id,
                similarity: r.similarity,
            })
            .collect())
    }

    async fn get_quote(&self, id: &str) -> Result<Option<QuoteRecord>> {
        let mut resp = self
            .db
            .query(
                "SELECT meta::id(id) AS id, line, character, movie, year
                 FROM type::thing($table, $id)",
            )
            .bind(("table", QUOTES_TABLE))
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<QuoteRecord> = resp.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Dedicated connection; it closes when the last handle is dropped.
    async fn session(&self) -> Result<Arc<dyn QuoteStore>> {
        debug!("Opening SurrealDB session");
        Ok(Arc::new(Self::open(self.options.clone()).await?))
    }
}

/// Brute-force store for tests and offline runs. Sessions share the rows.
#[derive(Debug, Default, Clone)]
pub struct InMemoryQuoteStore {
    quotes: Arc<HashMap<String, QuoteRecord>>,
    chunks: Arc<Vec<EmbeddingChunk>>,
}

impl InMemoryQuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_quote(&mut self, quote: QuoteRecord) {
        Arc::make_mut(&mut self.quotes).insert(quote.id.clone(), quote);
    }

    pub fn insert_chunk(&mut self, chunk: EmbeddingChunk) {
        Arc::make_mut(&mut self.chunks).push(chunk);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[async_trait]
impl QuoteStore for InMemoryQuoteStore {
    async fn query_nearest(
        &self,
        vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let mut hits: Vec<ChunkHit> = self
            .chunks
            .iter()
            .map(|c| ChunkHit {
                quote_id: c.quote_id.clone(),
                similarity: cosine_similarity(vector, &c.embedding),
            })
            .filter(|h| h.similarity > threshold)
            .collect();
        // stable: equal scores keep insertion order
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get_quote(&self, id: &str) -> Result<Option<QuoteRecord>> {
        Ok(self.quotes.get(id).cloned())
    }

    async fn session(&self) -> Result<Arc<dyn QuoteStore>> {
        Ok(Arc::new(self.clone()))
    }
}
