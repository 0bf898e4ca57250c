//! Hybrid ranking.
//!
//! Merges vector and lexical candidates into one ordered list:
//!
//! 1. Normalize each candidate's raw score ([`Normalizer`]).
//! 2. Drop candidates below their list's threshold.
//! 3. `combined = w_v × vector + w_l × lexical`, where a signal the message
//!    did not appear in contributes nothing. A vector-only match scoring
//!    0.8 under `w_v = 0.6` therefore ranks at 0.48, not 0.8.
//! 4. Sort by combined score descending, message id ascending.
//! 5. Truncate to `max_results`.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::RankingConfig;
use crate::error::RecallError;
use crate::models::{Candidate, RankedMatch, ScoreSource};
use crate::normalize::Normalizer;

/// Per-list weights actually applied to a request.
///
/// Hybrid requests use the configured pair; single-signal requests give the
/// active list the full weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub vector: f64,
    pub lexical: f64,
}

/// Validated hybrid ranker.
#[derive(Debug, Clone)]
pub struct HybridRanker {
    weights: Weights,
    vector_threshold: f64,
    lexical_threshold: f64,
    normalizer: Normalizer,
}

impl HybridRanker {
    /// Fails with [`RecallError::InvalidConfig`] unless the weights sum to
    /// 1.0 and every weight and threshold lies in `[0, 1]`.
    pub fn new(config: &RankingConfig) -> Result<Self, RecallError> {
        config.validate()?;
        Ok(Self {
            weights: Weights {
                vector: config.vector_weight,
                lexical: config.lexical_weight,
            },
            vector_threshold: config.vector_threshold,
            lexical_threshold: config.lexical_threshold,
            normalizer: Normalizer::new(config.lexical_k),
        })
    }

    pub fn weights(&self) -> Weights {
        self.weights
    }

    /// Rank with the configured weights.
    pub fn rank(
        &self,
        vector_candidates: &[Candidate],
        lexical_candidates: &[Candidate],
        max_results: usize,
    ) -> Vec<RankedMatch> {
        self.rank_weighted(vector_candidates, lexical_candidates, self.weights, max_results)
    }

    /// Rank with explicit weights (used for single-signal search modes).
    pub fn rank_weighted(
        &self,
        vector_candidates: &[Candidate],
        lexical_candidates: &[Candidate],
        weights: Weights,
        max_results: usize,
    ) -> Vec<RankedMatch> {
        // BTreeMap keyed by message id keeps the merge independent of input order.
        let mut merged: BTreeMap<&str, RankedMatch> = BTreeMap::new();

        for (candidates, source, threshold) in [
            (vector_candidates, ScoreSource::Vector, self.vector_threshold),
            (lexical_candidates, ScoreSource::Lexical, self.lexical_threshold),
        ] {
            for c in candidates.iter().filter(|c| c.source == source) {
                let norm = self.normalizer.normalize(c.raw_score, source);
                if norm < threshold {
                    continue;
                }
                let entry = merged
                    .entry(c.message_id.as_str())
                    .or_insert_with(|| RankedMatch {
                        message_id: c.message_id.clone(),
                        conversation_id: c.conversation_id.clone(),
                        combined_score: 0.0,
                        vector_score: None,
                        lexical_score: None,
                    });
                // A backend may return the same message twice; keep its best score.
                let slot = match source {
                    ScoreSource::Vector => &mut entry.vector_score,
                    ScoreSource::Lexical => &mut entry.lexical_score,
                };
                *slot = Some(slot.map_or(norm, |prev| prev.max(norm)));
            }
        }

        let mut ranked: Vec<RankedMatch> = merged
            .into_values()
            .map(|mut m| {
                m.combined_score = weights.vector * m.vector_score.unwrap_or(0.0)
                    + weights.lexical * m.lexical_score.unwrap_or(0.0);
                m
            })
            .collect();

        sort_ranked(&mut ranked);
        ranked.truncate(max_results);

        debug!(
            vector_in = vector_candidates.len(),
            lexical_in = lexical_candidates.len(),
            ranked = ranked.len(),
            "hybrid ranking complete"
        );
        ranked
    }
}

/// Combined score descending, message id ascending.
pub fn sort_ranked(ranked: &mut [RankedMatch]) {
    ranked.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, score: f64, source: ScoreSource) -> Candidate {
        Candidate {
            message_id: id.to_string(),
            conversation_id: "c1".to_string(),
            raw_score: score,
            source,
        }
    }

    fn ranker(vw: f64, lw: f64) -> HybridRanker {
        HybridRanker::new(&RankingConfig {
            vector_weight: vw,
            lexical_weight: lw,
            vector_threshold: 0.0,
            lexical_threshold: 0.0,
            lexical_k: 2.0,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_weights_not_summing_to_one() {
        for (vw, lw) in [(0.5, 0.4), (0.6, 0.6), (1.0, 0.1), (0.0, 0.0)] {
            let result = HybridRanker::new(&RankingConfig {
                vector_weight: vw,
                lexical_weight: lw,
                ..Default::default()
            });
            assert!(
                matches!(result, Err(RecallError::InvalidConfig(_))),
                "weights ({}, {}) should be rejected",
                vw,
                lw
            );
        }
    }

    #[test]
    fn test_vector_only_match_is_weighted() {
        let r = ranker(0.6, 0.4);
        let ranked = r.rank(&[cand("m1", 0.8, ScoreSource::Vector)], &[], 10);
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].combined_score - 0.48).abs() < 1e-9);
        assert_eq!(ranked[0].lexical_score, None);
    }

    #[test]
    fn test_agreement_sums_weighted_scores() {
        let r = ranker(0.6, 0.4);
        // lexical raw 2.0 with k = 2.0 normalizes to 0.5
        let ranked = r.rank(
            &[cand("m1", 0.8, ScoreSource::Vector)],
            &[cand("m1", 2.0, ScoreSource::Lexical)],
            10,
        );
        assert!((ranked[0].combined_score - (0.48 + 0.2)).abs() < 1e-9);
        assert_eq!(ranked[0].vector_score, Some(0.8));
        assert_eq!(ranked[0].lexical_score, Some(0.5));
    }

    #[test]
    fn test_thresholds_drop_before_combination() {
        let r = HybridRanker::new(&RankingConfig {
            vector_weight: 0.5,
            lexical_weight: 0.5,
            vector_threshold: 0.5,
            lexical_threshold: 0.0,
            lexical_k: 2.0,
            ..Default::default()
        })
        .unwrap();
        let ranked = r.rank(
            &[
                cand("low", 0.3, ScoreSource::Vector),
                cand("high", 0.9, ScoreSource::Vector),
            ],
            &[cand("low", 2.0, ScoreSource::Lexical)],
            10,
        );
        let low = ranked.iter().find(|m| m.message_id == "low").unwrap();
        assert_eq!(low.vector_score, None);
        assert!((low.combined_score - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_ties_break_by_message_id() {
        let r = ranker(0.5, 0.5);
        let ranked = r.rank(
            &[
                cand("m3", 0.5, ScoreSource::Vector),
                cand("m1", 0.5, ScoreSource::Vector),
                cand("m2", 0.5, ScoreSource::Vector),
            ],
            &[],
            10,
        );
        let ids: Vec<&str> = ranked.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_truncates_preserving_order() {
        let r = ranker(1.0, 0.0);
        let ranked = r.rank(
            &[
                cand("a", 0.1, ScoreSource::Vector),
                cand("b", 0.9, ScoreSource::Vector),
                cand("c", 0.5, ScoreSource::Vector),
            ],
            &[],
            2,
        );
        let ids: Vec<&str> = ranked.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_single_signal_weights() {
        let r = ranker(0.6, 0.4);
        let ranked = r.rank_weighted(
            &[],
            &[cand("m1", 2.0, ScoreSource::Lexical)],
            Weights {
                vector: 0.0,
                lexical: 1.0,
            },
            10,
        );
        assert!((ranked[0].combined_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let r = ranker(0.6, 0.4);
        let v = vec![
            cand("a", 0.7, ScoreSource::Vector),
            cand("b", 0.4, ScoreSource::Vector),
        ];
        let l = vec![
            cand("b", 3.0, ScoreSource::Lexical),
            cand("c", 1.0, ScoreSource::Lexical),
        ];
        let mut v_rev = v.clone();
        v_rev.reverse();
        let mut l_rev = l.clone();
        l_rev.reverse();
        assert_eq!(r.rank(&v, &l, 10), r.rank(&v_rev, &l_rev, 10));
    }
}
