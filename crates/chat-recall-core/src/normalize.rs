//! Score normalization.
//!
//! Maps the two heterogeneous ranking signals onto a common `[0, 1]` scale:
//!
//! | Source | Raw range | Mapping |
//! |--------|-----------|---------|
//! | vector | cosine, `[-1, 1]` | clipped to `[0, 1]` |
//! | lexical | BM25 relevance, `[0, ∞)` | `r / (r + k)` |
//!
//! Unlike per-query min-max normalization, both mappings are absolute: a
//! candidate's normalized score depends only on its own raw score and `k`,
//! never on the other candidates in the list.

use crate::models::ScoreSource;

/// Pure, stateless normalizer parameterized by the lexical constant `k`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalizer {
    lexical_k: f64,
}

impl Normalizer {
    /// `lexical_k` must be positive; [`RankingConfig::validate`](crate::config::RankingConfig::validate)
    /// enforces this before a normalizer is ever built.
    pub fn new(lexical_k: f64) -> Self {
        Self { lexical_k }
    }

    pub fn lexical_k(&self) -> f64 {
        self.lexical_k
    }

    pub fn normalize(&self, raw_score: f64, source: ScoreSource) -> f64 {
        match source {
            ScoreSource::Vector => normalize_cosine(raw_score),
            ScoreSource::Lexical => squash_rank(raw_score, self.lexical_k),
        }
    }
}

fn normalize_cosine(similarity: f64) -> f64 {
    if similarity.is_nan() {
        return 0.0;
    }
    similarity.clamp(0.0, 1.0)
}

fn squash_rank(rank: f64, k: f64) -> f64 {
    if rank.is_nan() || rank <= 0.0 {
        return 0.0;
    }
    if rank.is_infinite() {
        return 1.0;
    }
    rank / (rank + k)
}
