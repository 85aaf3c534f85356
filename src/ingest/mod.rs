//! Quote corpus ingestion
//!
//! Rows come from a CSV with `Quote, Character, Movie, Reference, Tag` columns
//! and an optional `Year`. Parsing is deterministic: the same file always
//! yields the same quote ids, years and chunks.

pub mod chunking;

use std::collections::HashSet;
use std::io::Read;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DecisionError, Result};
use crate::models::QuoteRecord;

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("year pattern compiles"));

/// One CSV row as written by the quotes dataset
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QuoteRow {
    #[serde(rename = "Quote")]
    pub quote: Option<String>,
    #[serde(rename = "Character")]
    pub character: Option<String>,
    #[serde(rename = "Movie")]
    pub movie: Option<String>,
    #[serde(rename = "Reference")]
    pub reference: Option<String>,
    #[serde(rename = "Tag")]
    pub tag: Option<String>,
    #[serde(rename = "Year")]
    pub year: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuote {
    pub record: QuoteRecord,
    pub tag: String,
}

/// Counters reported by the ingest binary
#[derive(Debug, Default, Serialize)]
pub struct IngestStats {
    pub started_at: String,
    pub finished_at: String,
    pub dry_run: bool,
    pub rows_read: usize,
    pub rows_malformed: usize,
    pub rows_missing_fields: usize,
    pub rows_without_year: usize,
    pub duplicates: usize,
    pub quotes_written: usize,
    pub chunks_written: usize,
}

pub fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Stable id for a quote, derived from who said what where
pub fn quote_id(movie: &str, character: &str, line: &str) -> String {
    let hash = blake3::hash(format!("quote:{}:{}:{}", movie, character, line).as_bytes());
    hash.to_hex().as_str()[..20].to_string()
}

/// First plausible release year (1900-2099) in free text
pub fn extract_year(text: &str) -> Option<i32> {
    YEAR_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn required(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Validate one row. Rows missing a required field or a derivable year are skipped.
pub fn parse_row(row: &QuoteRow, stats: &mut IngestStats) -> Option<ParsedQuote> {
    let (Some(line), Some(character), Some(movie), Some(reference), Some(tag)) = (
        required(&row.quote),
        required(&row.character),
        required(&row.movie),
        required(&row.reference),
        required(&row.tag),
    ) else {
        stats.rows_missing_fields += 1;
        return None;
    };

    let explicit = row
        .year
        .as_deref()
        .and_then(|y| y.trim().parse::<i32>().ok());
    let Some(year) = explicit
        .or_else(|| extract_year(&reference))
        .or_else(|| extract_year(&movie))
    else {
        warn!("Skipping quote from '{}': no year in row", movie);
        stats.rows_without_year += 1;
        return None;
    };

    Some(ParsedQuote {
        record: QuoteRecord {
            id: quote_id(&movie, &character, &line),
            line,
            character,
            movie,
            year,
        },
        tag,
    })
}

/// Read every usable quote from CSV input, in file order, without duplicates.
pub fn read_quotes<R: Read>(input: R, stats: &mut IngestStats) -> Result<Vec<ParsedQuote>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(input);
    let headers = reader.headers().map_err(|e| DecisionError::Validation {
        message: format!("Unreadable CSV header: {}", e),
    })?;
    if !headers.iter().any(|h| h == "Quote") {
        return Err(DecisionError::Validation {
            message: "CSV has no 'Quote' column".to_string(),
        });
    }

    let mut seen = HashSet::new();
    let mut quotes = Vec::new();
    for (i, row) in reader.deserialize::<QuoteRow>().enumerate() {
        stats.rows_read += 1;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping malformed row {}: {}", i + 2, e);
                stats.rows_malformed += 1;
                continue;
            }
        };
        let Some(parsed) = parse_row(&row, stats) else {
            continue;
        };
        if !seen.insert(parsed.record.id.clone()) {
            stats.duplicates += 1;
            continue;
        }
        quotes.push(parsed);
    }
    Ok(quotes)
}
