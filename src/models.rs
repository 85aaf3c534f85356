//! Data carried through one decision run.

use serde::{Deserialize, Serialize};

/// One candidate answer to a dilemma.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOption {
    pub title: String,
    pub justification: String,
}

impl DecisionOption {
    pub fn new(title: impl Into<String>, justification: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            justification: justification.into(),
        }
    }

    /// Text embedded when searching for a matching quote.
    pub fn composite_query(&self) -> String {
        format!("{}; {}", self.title, self.justification)
    }
}

/// A stored quotation. Written by ingestion, read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub id: String,
    pub line: String,
    pub character: String,
    pub movie: String,
    pub year: i32,
}

/// One embedded slice of a quotation's line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingChunk {
    pub quote_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Nearest-neighbour hit as returned by a store, before joining the quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkHit {
    pub quote_id: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatch {
    pub quote: QuoteRecord,
    pub similarity: f32,
}

/// The winning option/quote pair of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct BestDialog {
    pub quote: QuoteRecord,
    pub chosen_option: DecisionOption,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionVerdict {
    pub title: String,
    pub justification: String,
    pub is_chosen: bool,
}

/// Final payload of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub response: String,
    pub original_quote: String,
    pub character: String,
    pub movie: String,
    pub year: i32,
    pub options: Vec<OptionVerdict>,
}

impl DecisionResult {
    /// Annotate every extracted option, marking the one `best` picked.
    pub fn assemble(response: String, best: &BestDialog, options: &[DecisionOption]) -> Self {
        let options = options
            .iter()
            .map(|o| OptionVerdict {
                title: o.title.clone(),
                justification: o.justification.clone(),
                is_chosen: o.title == best.chosen_option.title,
            })
            .collect();
        Self {
            response,
            original_quote: best.quote.line.clone(),
            character: best.quote.character.clone(),
            movie: best.quote.movie.clone(),
            year: best.quote.year,
            options,
        }
    }

    pub fn chosen(&self) -> Option<&OptionVerdict> {
        self.options.iter().find(|o| o.is_chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote() -> QuoteRecord {
        QuoteRecord {
            id: "q1".into(),
            line: "Do. Or do not. There is no try.".into(),
            character: "Yoda".into(),
            movie: "The Empire Strikes Back".into(),
            year: 1980,
        }
    }

    #[test]
    fn composite_query_joins_title_and_justification() {
        let o = DecisionOption::new("Take the offer", "Growth matters");
        assert_eq!(o.composite_query(), "Take the offer; Growth matters");
    }

    #[test]
    fn assemble_marks_exactly_the_chosen_title() {
        let options = vec![
            DecisionOption::new("Take the offer", "Growth"),
            DecisionOption::new("Stay", "Stability"),
        ];
        let best = BestDialog {
            quote: quote(),
            chosen_option: options[1].clone(),
            similarity: 0.8,
        };
        let result = DecisionResult::assemble("Stay, you must.".into(), &best, &options);
        assert_eq!(result.options.iter().filter(|o| o.is_chosen).count(), 1);
        assert_eq!(result.chosen().map(|o| o.title.as_str()), Some("Stay"));
        assert_eq!(result.year, 1980);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["original_quote"], "Do. Or do not. There is no try.");
        assert_eq!(json["options"][1]["is_chosen"], true);
    }
}
