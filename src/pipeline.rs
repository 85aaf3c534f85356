//! Decision orchestration: extract, select, rewrite, merge, and stream frames.
//!
//! Every run ends with exactly one terminal frame, either the full
//! [`DecisionResult`] or an error frame naming the stage that failed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use crate::config::Config;
use crate::embeddings::{Embedder, EmbeddingClient, create_embedder};
use crate::error::{DecisionError, Result};
use crate::extractor::OptionExtractor;
use crate::generation::{GenerationClient, Generator, create_generator};
use crate::merger::JustificationMerger;
use crate::models::DecisionResult;
use crate::retriever::SimilarityRetriever;
use crate::rewriter::PersonaRewriter;
use crate::selector::BestMatchSelector;
use crate::store::QuoteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extracting,
    Selecting,
    Rewriting,
    Merging,
    Done,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extracting => "extracting",
            Stage::Selecting => "selecting",
            Stage::Rewriting => "rewriting",
            Stage::Merging => "merging",
            Stage::Done => "done",
            Stage::Error => "error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorFrame {
    pub kind: String,
    pub stage: Stage,
    pub message: String,
}

impl ErrorFrame {
    pub fn new(stage: Stage, err: &DecisionError) -> Self {
        Self {
            kind: err.kind().to_string(),
            stage,
            message: err.to_string(),
        }
    }
}

/// One unit of streamed output.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionFrame {
    /// Option titles in extraction order.
    Options(Vec<String>),
    Decision(DecisionResult),
    Error(ErrorFrame),
}

impl DecisionFrame {
    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            DecisionFrame::Options(_) => "options",
            DecisionFrame::Decision(_) => "decision",
            DecisionFrame::Error(_) => "error",
        }
    }

    pub fn data(&self) -> serde_json::Result<Value> {
        match self {
            DecisionFrame::Options(titles) => serde_json::to_value(titles),
            DecisionFrame::Decision(result) => serde_json::to_value(result),
            DecisionFrame::Error(frame) => Ok(json!({ "error": serde_json::to_value(frame)? })),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DecisionFrame::Options(_))
    }
}

#[derive(Clone)]
pub struct DecisionPipeline {
    extractor: OptionExtractor,
    selector: BestMatchSelector,
    rewriter: PersonaRewriter,
    merger: JustificationMerger,
    request_timeout: Duration,
}

impl DecisionPipeline {
    pub fn new(
        extractor: OptionExtractor,
        selector: BestMatchSelector,
        rewriter: PersonaRewriter,
        merger: JustificationMerger,
        request_timeout: Duration,
    ) -> Self {
        Self {
            extractor,
            selector,
            rewriter,
            merger,
            request_timeout,
        }
    }

    /// Wire the stages from explicit collaborators.
    pub fn from_parts(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        store: Arc<dyn QuoteStore>,
    ) -> Self {
        let embeddings = EmbeddingClient::new(embedder, config.retry.embedding.clone());
        let generation = GenerationClient::new(generator, config.retry.generation.clone());
        let retriever = SimilarityRetriever::new(
            embeddings,
            store,
            config.retrieval.similarity_threshold,
            config.retrieval.limit,
        );
        Self::new(
            OptionExtractor::new(generation.clone()),
            BestMatchSelector::new(retriever, config.retrieval.selection_policy),
            PersonaRewriter::new(generation.clone()),
            JustificationMerger::new(generation),
            config.request_timeout(),
        )
    }

    pub fn from_config(config: &Config, store: Arc<dyn QuoteStore>) -> Result<Self> {
        let embedder = create_embedder(config)?;
        let generator = create_generator(config)?;
        Ok(Self::from_parts(config, embedder, generator, store))
    }

    /// Run once, pushing frames into `tx`. The terminal frame is always sent
    /// unless the receiver is gone.
    pub async fn run(
        &self,
        dilemma: &str,
        tx: mpsc::Sender<DecisionFrame>,
        cancel: CancellationToken,
    ) -> Result<DecisionResult> {
        let request_id = Uuid::new_v4();
        let span = info_span!("decision", request_id = %request_id);
        async move {
            let mut stage = Stage::Extracting;
            let timed = tokio::time::timeout(
                self.request_timeout,
                self.stages(dilemma, &tx, &cancel, &mut stage),
            )
            .await;
            let outcome = match timed {
                Ok(outcome) => outcome,
                Err(_) => Err(DecisionError::Timeout {
                    operation: format!("decision ({})", stage),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                }),
            };

            let frame = match &outcome {
                Ok(result) => DecisionFrame::Decision(result.clone()),
                Err(e) => {
                    error!("Decision failed while {}: {}", stage, e);
                    info!("Stage {} -> {}", stage, Stage::Error);
                    DecisionFrame::Error(ErrorFrame::new(stage, e))
                }
            };
            if tx.send(frame).await.is_err() {
                debug!("Receiver dropped before the terminal frame");
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn stages(
        &self,
        dilemma: &str,
        tx: &mpsc::Sender<DecisionFrame>,
        cancel: &CancellationToken,
        stage: &mut Stage,
    ) -> Result<DecisionResult> {
        let dilemma = dilemma.trim();
        if dilemma.is_empty() {
            return Err(DecisionError::Validation {
                message: "dilemma must not be empty".to_string(),
            });
        }

        info!("Stage {}", stage);
        let options = self.extractor.extract(dilemma, cancel).await?;
        let titles = options.iter().map(|o| o.title.clone()).collect();
        tx.send(DecisionFrame::Options(titles))
            .await
            .map_err(|_| DecisionError::Cancelled {
                operation: "send options".to_string(),
            })?;

        *stage = Stage::Selecting;
        info!("Stage {} ({} options)", stage, options.len());
        let best = {
            let selector = self.selector.session().await?;
            selector.select(&options, cancel).await?
        };

        *stage = Stage::Rewriting;
        info!("Stage {}", stage);
        let rewritten = self.rewriter.rewrite(&best, dilemma, cancel).await?;

        *stage = Stage::Merging;
        info!("Stage {}", stage);
        let response = self.merger.merge(&rewritten, &best.quote.line, cancel).await?;

        *stage = Stage::Done;
        info!("Stage {}", stage);
        Ok(DecisionResult::assemble(response, &best, &options))
    }

    /// Spawn a run and expose its frames as a stream. Dropping the stream
    /// cancels the run.
    pub fn stream(&self, dilemma: String) -> impl Stream<Item = DecisionFrame> + Send + use<> {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let pipeline = self.clone();
        tokio::spawn(async move {
            let _ = pipeline.run(&dilemma, tx, cancel).await;
        });
        futures_util::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|frame| (frame, (rx, guard)))
        })
    }

    /// Run to completion without streaming.
    pub async fn decide(&self, dilemma: &str, cancel: CancellationToken) -> Result<DecisionResult> {
        // options + terminal frame fit without a reader
        let (tx, _rx) = mpsc::channel(4);
        self.run(dilemma, tx, cancel).await
    }
}
