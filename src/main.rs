use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tracing::info;

use decisionator::config::{Config, RuntimeConfig, load_env_files};
use decisionator::http::start_http_server;
use decisionator::pipeline::{DecisionFrame, DecisionPipeline};
use decisionator::store::SurrealQuoteStore;

#[derive(Parser)]
#[command(name = "decisionator")]
#[command(about = "Answer dilemmas with the movie quote that fits best", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve POST /ask over HTTP with server-sent events
    Serve {
        /// Listen address (defaults to DECIDE_HTTP_BIND)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Run one dilemma and print each frame as a JSON line
    Ask {
        /// The dilemma, in plain words
        dilemma: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    load_env_files();
    decisionator::init_tracing(&RuntimeConfig::load_from_env().log_level);

    let config = Config::load()?;
    let store = SurrealQuoteStore::connect(&config).await?;
    let pipeline = DecisionPipeline::from_config(&config, Arc::new(store))?;

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or(config.runtime.http_bind);
            info!(
                "decisionator serving (threshold={}, policy={:?})",
                config.retrieval.similarity_threshold, config.retrieval.selection_policy
            );
            start_http_server(
                pipeline,
                bind,
                std::time::Duration::from_secs(config.runtime.http_sse_keepalive_sec),
                &config.runtime.cors_origins,
            )
            .await
        }
        Commands::Ask { dilemma } => {
            let mut frames = Box::pin(pipeline.stream(dilemma));
            let mut failed = false;
            while let Some(frame) = frames.next().await {
                println!(
                    "{}",
                    serde_json::json!({ "event": frame.event_name(), "data": frame.data()? })
                );
                failed |= matches!(frame, DecisionFrame::Error(_));
            }
            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
