//! Fan options out to the retriever and keep the single best pairing.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DecisionError, Result};
use crate::models::{BestDialog, DecisionOption, SimilarityMatch};
use crate::retriever::SimilarityRetriever;

/// What to do when one option finds no quote above the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Skip unmatched options; fail only if none match.
    #[default]
    SkipUnmatched,
    /// Fail the whole selection on the first unmatched option.
    AbortOnFirstFailure,
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip_unmatched" | "skip" => Ok(SelectionPolicy::SkipUnmatched),
            "abort_on_first_failure" | "abort" => Ok(SelectionPolicy::AbortOnFirstFailure),
            other => Err(format!("unknown selection policy '{}'", other)),
        }
    }
}

/// Retrieval outcome for one option, in extraction order.
#[derive(Debug)]
pub struct OptionOutcome {
    pub option: DecisionOption,
    pub result: Result<SimilarityMatch>,
}

#[derive(Clone)]
pub struct BestMatchSelector {
    retriever: SimilarityRetriever,
    policy: SelectionPolicy,
}

impl BestMatchSelector {
    pub fn new(retriever: SimilarityRetriever, policy: SelectionPolicy) -> Self {
        Self { retriever, policy }
    }

    /// Same selector bound to a fresh store session, released on drop.
    pub async fn session(&self) -> Result<Self> {
        Ok(Self {
            retriever: self.retriever.session().await?,
            policy: self.policy,
        })
    }

    /// Query every option in order. Infrastructure failures abort immediately.
    pub async fn collect(
        &self,
        options: &[DecisionOption],
        cancel: &CancellationToken,
    ) -> Result<Vec<OptionOutcome>> {
        let mut outcomes = Vec::with_capacity(options.len());
        for option in options {
            let result = self
                .retriever
                .find_best_match(&option.composite_query(), cancel)
                .await;
            match result {
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) if self.policy == SelectionPolicy::AbortOnFirstFailure => return Err(e),
                result => outcomes.push(OptionOutcome {
                    option: option.clone(),
                    result,
                }),
            }
        }
        Ok(outcomes)
    }

    pub async fn select(
        &self,
        options: &[DecisionOption],
        cancel: &CancellationToken,
    ) -> Result<BestDialog> {
        let outcomes = self.collect(options, cancel).await?;
        let best = pick_best(outcomes, self.retriever.threshold())?;
        info!(
            "Selected '{}' -> quote {} ({:.3})",
            best.chosen_option.title, best.quote.id, best.similarity
        );
        Ok(best)
    }
}

/// Highest similarity wins; on exact ties the earliest option keeps the spot.
pub fn pick_best(outcomes: Vec<OptionOutcome>, threshold: f32) -> Result<BestDialog> {
    let mut best: Option<BestDialog> = None;
    let mut first_err: Option<DecisionError> = None;
    for OptionOutcome { option, result } in outcomes {
        match result {
            Ok(m) => {
                debug!("Option '{}' scored {:.3}", option.title, m.similarity);
                if best.as_ref().is_none_or(|b| m.similarity > b.similarity) {
                    best = Some(BestDialog {
                        quote: m.quote,
                        chosen_option: option,
                        similarity: m.similarity,
                    });
                }
            }
            Err(e) => {
                warn!("Option '{}' skipped: {}", option.title, e);
                first_err.get_or_insert(e);
            }
        }
    }
    best.ok_or_else(|| {
        first_err.unwrap_or(DecisionError::NoMatchFound {
            query: String::new(),
            threshold,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuoteRecord;

    fn hit(option: &str, quote: &str, similarity: f32) -> OptionOutcome {
        OptionOutcome {
            option: DecisionOption::new(option, "because"),
            result: Ok(SimilarityMatch {
                quote: QuoteRecord {
                    id: quote.into(),
                    line: "l".into(),
                    character: "c".into(),
                    movie: "m".into(),
                    year: 1990,
                },
                similarity,
            }),
        }
    }

    fn miss(option: &str) -> OptionOutcome {
        OptionOutcome {
            option: DecisionOption::new(option, "because"),
            result: Err(DecisionError::NoMatchFound {
                query: option.into(),
                threshold: 0.6,
            }),
        }
    }

    #[test]
    fn global_max_wins_regardless_of_order() {
        let a = pick_best(vec![hit("A", "q1", 0.7), hit("B", "q2", 0.9), hit("C", "q3", 0.65)], 0.6)
            .unwrap();
        let b = pick_best(vec![hit("C", "q3", 0.65), hit("A", "q1", 0.7), hit("B", "q2", 0.9)], 0.6)
            .unwrap();
        assert_eq!(a.chosen_option.title, "B");
        assert_eq!(b.chosen_option.title, "B");
        assert_eq!(a.similarity, 0.9);
    }

    #[test]
    fn exact_tie_keeps_first_extracted() {
        let best = pick_best(vec![hit("First", "q1", 0.75), hit("Second", "q2", 0.75)], 0.6).unwrap();
        assert_eq!(best.chosen_option.title, "First");
        assert_eq!(best.quote.id, "q1");
    }

    #[test]
    fn unmatched_options_are_skipped() {
        let best = pick_best(vec![miss("A"), hit("B", "q2", 0.61)], 0.6).unwrap();
        assert_eq!(best.chosen_option.title, "B");
    }

    #[test]
    fn all_unmatched_is_no_match() {
        let err = pick_best(vec![miss("A"), miss("B")], 0.6).unwrap_err();
        assert!(matches!(err, DecisionError::NoMatchFound { ref query, .. } if query == "A"));
        let err = pick_best(vec![], 0.6).unwrap_err();
        assert!(matches!(err, DecisionError::NoMatchFound { .. }));
    }

    #[test]
    fn policy_parses_from_env_spelling() {
        assert_eq!("abort".parse::<SelectionPolicy>().unwrap(), SelectionPolicy::AbortOnFirstFailure);
        assert_eq!(
            "Skip_Unmatched".parse::<SelectionPolicy>().unwrap(),
            SelectionPolicy::SkipUnmatched
        );
        assert!("maybe".parse::<SelectionPolicy>().is_err());
    }
}
