//! Restate the chosen justification in the quote speaker's voice.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DecisionError, Result};
use crate::generation::{GenerationClient, StructuredSchema, is_output_failure};
use crate::models::BestDialog;
use crate::prompts;

#[derive(Debug, Deserialize)]
struct PersonaReply {
    justification: String,
}

pub fn persona_schema() -> StructuredSchema {
    StructuredSchema::single_string(
        "persona_rewrite",
        "justification",
        "The justification restated in the speaker's own voice",
    )
}

#[derive(Clone)]
pub struct PersonaRewriter {
    generation: GenerationClient,
}

impl PersonaRewriter {
    pub fn new(generation: GenerationClient) -> Self {
        Self { generation }
    }

    pub async fn rewrite(
        &self,
        best: &BestDialog,
        dilemma: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let reply: PersonaReply = self
            .generation
            .generate(
                "rewrite_in_persona",
                &prompts::rewrite_in_persona(best, dilemma),
                &persona_schema(),
                cancel,
            )
            .await
            .map_err(as_rewrite_error)?;
        let text = reply.justification.trim();
        if text.is_empty() {
            return Err(DecisionError::Rewrite {
                message: "persona rewrite came back empty".to_string(),
            });
        }
        debug!("Rewrote justification as {}", best.quote.character);
        Ok(text.to_string())
    }
}

fn as_rewrite_error(e: DecisionError) -> DecisionError {
    if is_output_failure(&e) {
        DecisionError::Rewrite {
            message: e.to_string(),
        }
    } else {
        e
    }
}
