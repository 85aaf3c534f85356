//! Fold a persona justification back into the original line of dialog.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{DecisionError, Result};
use crate::generation::{GenerationClient, StructuredSchema, is_output_failure};
use crate::prompts;

#[derive(Debug, Deserialize)]
struct MergeReply {
    dialog: String,
}

pub fn merge_schema() -> StructuredSchema {
    StructuredSchema::single_string(
        "merged_dialog",
        "dialog",
        "The original line rewritten to carry the new meaning",
    )
}

#[derive(Clone)]
pub struct JustificationMerger {
    generation: GenerationClient,
}

impl JustificationMerger {
    pub fn new(generation: GenerationClient) -> Self {
        Self { generation }
    }

    pub async fn merge(
        &self,
        rewritten: &str,
        original_line: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let reply: MergeReply = self
            .generation
            .generate(
                "merge_into_line",
                &prompts::merge_into_line(rewritten, original_line),
                &merge_schema(),
                cancel,
            )
            .await
            .map_err(|e| {
                if is_output_failure(&e) {
                    DecisionError::Merge {
                        message: e.to_string(),
                    }
                } else {
                    e
                }
            })?;
        match reply.dialog.trim() {
            "" => Err(DecisionError::Merge {
                message: "merged dialog came back empty".to_string(),
            }),
            line => Ok(line.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Generator;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    struct Recording {
        prompts: Mutex<Vec<String>>,
        reply: Value,
    }

    #[async_trait]
    impl Generator for Recording {
        async fn generate_structured(&self, prompt: &str, _s: &StructuredSchema) -> Result<Value> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn prompt_carries_both_texts() {
        let generator = Arc::new(Recording {
            prompts: Mutex::new(Vec::new()),
            reply: json!({"dialog": "Go ahead, take the job."}),
        });
        let merger = JustificationMerger::new(GenerationClient::new(generator.clone(), RetryPolicy::once()));
        let out = merger
            .merge("Take the job, punk.", "Go ahead, make my day.", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "Go ahead, take the job.");
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("\"Go ahead, make my day.\""));
        assert!(prompts[0].contains("\"Take the job, punk.\""));
    }

    #[tokio::test]
    async fn empty_dialog_is_a_merge_error() {
        let generator = Arc::new(Recording {
            prompts: Mutex::new(Vec::new()),
            reply: json!({"dialog": ""}),
        });
        let merger = JustificationMerger::new(GenerationClient::new(generator, RetryPolicy::once()));
        let err = merger
            .merge("a", "b", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::Merge { .. }));
    }
}
