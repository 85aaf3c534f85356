//! SurrealDB schema for the quote corpus.
//!
//! Ingestion owns these tables; the pipeline only reads them. The HNSW index
//! over `quote_chunks.embedding` uses cosine distance, tuned by graph degree
//! (`M`) and construction search width (`EFC`).

use serde::{Deserialize, Serialize};

pub const QUOTES_TABLE: &str = "quotes";
pub const CHUNKS_TABLE: &str = "quote_chunks";

/// HNSW tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    pub m: usize,
    pub efc: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self { m: 16, efc: 64 }
    }
}

impl HnswParams {
    /// Search width used at query time for `limit` neighbours.
    pub fn ef_search(limit: usize) -> usize {
        (limit * 4).max(40)
    }
}

/// Table, field and index definitions for an embedding dimension.
pub fn definitions(dim: usize, hnsw: HnswParams) -> String {
    format!(
        r#"
        DEFINE TABLE {quotes} SCHEMAFULL;
        DEFINE FIELD line ON TABLE {quotes} TYPE string;
        DEFINE FIELD character ON TABLE {quotes} TYPE string;
        DEFINE FIELD movie ON TABLE {quotes} TYPE string;
        DEFINE FIELD year ON TABLE {quotes} TYPE int;
        DEFINE FIELD tag ON TABLE {quotes} TYPE option<string>;
        DEFINE FIELD ingested_at ON TABLE {quotes} TYPE datetime;

        DEFINE TABLE {chunks} SCHEMAFULL;
        DEFINE FIELD quote ON TABLE {chunks} TYPE record<{quotes}>;
        DEFINE FIELD content ON TABLE {chunks} TYPE string;
        DEFINE FIELD embedding ON TABLE {chunks} TYPE array<float>;
        DEFINE INDEX idx_{chunks}_quote ON TABLE {chunks} FIELDS quote;
        DEFINE INDEX idx_{chunks}_embedding ON TABLE {chunks} FIELDS embedding HNSW DIMENSION {dim} DIST COSINE TYPE F32 EFC {efc} M {m};
        "#,
        quotes = QUOTES_TABLE,
        chunks = CHUNKS_TABLE,
        dim = dim,
        efc = hnsw.efc,
        m = hnsw.m,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_carries_dimension_and_tuning() {
        let sql = definitions(768, HnswParams { m: 12, efc: 150 });
        assert!(sql.contains("HNSW DIMENSION 768 DIST COSINE TYPE F32 EFC 150 M 12"));
        assert!(sql.contains("TYPE record<quotes>"));
    }

    #[test]
    fn ef_search_has_a_floor() {
        assert_eq!(HnswParams::ef_search(1), 40);
        assert_eq!(HnswParams::ef_search(25), 100);
    }
}
