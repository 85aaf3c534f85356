//! Dilemma -> validated list of candidate options.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::error::{DecisionError, Result};
use crate::generation::{GenerationClient, StructuredSchema, is_output_failure};
use crate::models::DecisionOption;
use crate::prompts;

pub const MIN_OPTIONS: usize = 2;

#[derive(Debug, Deserialize)]
struct ExtractionReply {
    options: Vec<DecisionOption>,
}

pub fn options_schema() -> StructuredSchema {
    StructuredSchema {
        name: "decision_options",
        schema: json!({
            "type": "object",
            "properties": {
                "options": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string", "description": "Short name of the option" },
                            "justification": { "type": "string", "description": "Why someone would pick it" }
                        },
                        "required": ["title", "justification"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["options"],
            "additionalProperties": false
        }),
    }
}

#[derive(Clone)]
pub struct OptionExtractor {
    generation: GenerationClient,
}

impl OptionExtractor {
    pub fn new(generation: GenerationClient) -> Self {
        Self { generation }
    }

    pub async fn extract(
        &self,
        dilemma: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DecisionOption>> {
        let reply: ExtractionReply = self
            .generation
            .generate(
                "extract_options",
                &prompts::extract_options(dilemma),
                &options_schema(),
                cancel,
            )
            .await
            .map_err(|e| {
                if is_output_failure(&e) {
                    DecisionError::OptionExtraction {
                        message: e.to_string(),
                    }
                } else {
                    e
                }
            })?;
        let options = validate_options(reply.options)?;
        debug!("Extracted {} options", options.len());
        Ok(options)
    }
}

fn title_key(title: &str) -> String {
    title
        .nfkc()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Trim, reject blanks, drop repeated titles, require at least two survivors.
pub fn validate_options(raw: Vec<DecisionOption>) -> Result<Vec<DecisionOption>> {
    let mut seen = HashSet::new();
    let mut options = Vec::with_capacity(raw.len());
    for (i, option) in raw.into_iter().enumerate() {
        let title = option.title.trim();
        let justification = option.justification.trim();
        if title.is_empty() || justification.is_empty() {
            return Err(DecisionError::OptionExtraction {
                message: format!("option {} has an empty title or justification", i + 1),
            });
        }
        if !seen.insert(title_key(title)) {
            warn!("Dropping repeated option title '{}'", title);
            continue;
        }
        options.push(DecisionOption::new(title, justification));
    }
    if options.len() < MIN_OPTIONS {
        return Err(DecisionError::OptionExtraction {
            message: format!(
                "expected at least {} distinct options, got {}",
                MIN_OPTIONS,
                options.len()
            ),
        });
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_order_and_trims() {
        let out = validate_options(vec![
            DecisionOption::new("  Take the offer ", " More money "),
            DecisionOption::new("Stay", "Known team"),
        ])
        .unwrap();
        assert_eq!(out[0], DecisionOption::new("Take the offer", "More money"));
        assert_eq!(out[1].title, "Stay");
    }

    #[test]
    fn a_single_option_is_rejected() {
        let err = validate_options(vec![DecisionOption::new("Stay", "Safe")]).unwrap_err();
        assert!(matches!(err, DecisionError::OptionExtraction { .. }));
    }

    #[test]
    fn duplicates_do_not_count_twice() {
        let err = validate_options(vec![
            DecisionOption::new("Stay", "Safe"),
            DecisionOption::new("  STAY ", "Also safe"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("got 1"));

        let ok = validate_options(vec![
            DecisionOption::new("Stay", "Safe"),
            DecisionOption::new("stay", "dup"),
            DecisionOption::new("Go", "Adventure"),
        ])
        .unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(ok[1].title, "Go");
    }

    #[test]
    fn fullwidth_titles_normalise_to_the_same_key() {
        assert_eq!(title_key("ＳＴＡＹ"), title_key("stay"));
    }

    #[test]
    fn blank_justification_is_rejected() {
        let err = validate_options(vec![
            DecisionOption::new("Stay", "   "),
            DecisionOption::new("Go", "Why not"),
        ])
        .unwrap_err();
        assert!(matches!(err, DecisionError::OptionExtraction { .. }));
    }
}
