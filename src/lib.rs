pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod http;
pub mod ingest;
pub mod merger;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod retriever;
pub mod retry;
pub mod rewriter;
pub mod schema;
pub mod selector;
pub mod store;
pub mod utils;

pub use error::{DecisionError, Result};
pub use pipeline::{DecisionFrame, DecisionPipeline, Stage};

/// Install the global tracing subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
