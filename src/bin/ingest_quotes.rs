//! Load a quotes CSV into SurrealDB: quote rows, chunk embeddings, HNSW index.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use decisionator::config::{Config, RuntimeConfig, load_env_files};
use decisionator::embeddings::{EmbeddingClient, create_embedder};
use decisionator::ingest::{IngestStats, chunking::chunk_line, current_timestamp, read_quotes};
use decisionator::models::EmbeddingChunk;
use decisionator::schema::HnswParams;
use decisionator::store::SurrealQuoteStore;

#[derive(Parser, Debug)]
#[command(author, version, about = "Ingest movie quotes and build the similarity index", long_about = None)]
struct Args {
    /// Quotes CSV (Quote, Character, Movie, Reference, Tag[, Year])
    #[arg(long)]
    csv: PathBuf,

    /// Longest chunk embedded, in characters
    #[arg(long, default_value = "400")]
    max_chunk_chars: usize,

    /// HNSW graph degree (M)
    #[arg(long, default_value = "16")]
    hnsw_m: usize,

    /// HNSW construction search width (EFC)
    #[arg(long, default_value = "64")]
    hnsw_efc: usize,

    /// Delete existing quotes and chunks first
    #[arg(long)]
    clear: bool,

    /// Parse and chunk only; nothing is embedded or written
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    load_env_files();
    decisionator::init_tracing(&RuntimeConfig::load_from_env().log_level);

    let config = Config::load()?;
    let file = File::open(&args.csv).with_context(|| format!("opening {}", args.csv.display()))?;

    let mut stats = IngestStats {
        started_at: current_timestamp(),
        dry_run: args.dry_run,
        ..Default::default()
    };
    let quotes = read_quotes(file, &mut stats)?;
    info!("Parsed {} quotes from {}", quotes.len(), args.csv.display());

    let chunked: Vec<Vec<String>> = quotes
        .iter()
        .map(|q| chunk_line(&q.record.line, args.max_chunk_chars))
        .collect();

    if args.dry_run {
        stats.chunks_written = chunked.iter().map(Vec::len).sum();
        stats.quotes_written = quotes.len();
        stats.finished_at = current_timestamp();
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let embeddings = EmbeddingClient::new(create_embedder(&config)?, config.retry.embedding.clone());
    let store = SurrealQuoteStore::connect(&config).await?;
    let hnsw = HnswParams {
        m: args.hnsw_m,
        efc: args.hnsw_efc,
    };
    store.ensure_schema(embeddings.dimensions(), hnsw).await?;
    if args.clear {
        warn!("Clearing existing quotes and chunks");
        store.clear().await?;
    }

    let cancel = CancellationToken::new();
    for (quote, chunks) in quotes.iter().zip(chunked) {
        if chunks.is_empty() {
            continue;
        }
        let vectors = embeddings.embed_batch(&chunks, &cancel).await?;
        store.upsert_quote(&quote.record, Some(quote.tag.as_str())).await?;
        store.delete_chunks_for(&quote.record.id).await?;
        stats.quotes_written += 1;
        for (content, embedding) in chunks.into_iter().zip(vectors) {
            store
                .insert_chunk(&EmbeddingChunk {
                    quote_id: quote.record.id.clone(),
                    content,
                    embedding,
                })
                .await?;
            stats.chunks_written += 1;
        }
        if stats.quotes_written % 100 == 0 {
            info!("Ingested {} quotes", stats.quotes_written);
        }
    }

    stats.finished_at = current_timestamp();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
