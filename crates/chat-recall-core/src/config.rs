//! Pipeline configuration.
//!
//! Built once at process start (the application crate deserializes it from
//! TOML and environment overrides), validated, then handed by value to
//! [`RecallPipeline::new`](crate::pipeline::RecallPipeline::new). No stage
//! reads configuration from anywhere else.

use serde::Deserialize;

use crate::error::RecallError;

/// Tolerance for the `vector_weight + lexical_weight == 1.0` check.
pub const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// Upper bound on the request's `context_window`.
pub const MAX_CONTEXT_WINDOW: usize = 10;

/// Hybrid ranking parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    /// Minimum normalized vector score for a candidate to be kept.
    #[serde(default = "default_vector_threshold")]
    pub vector_threshold: f64,
    /// Minimum normalized lexical score for a candidate to be kept.
    #[serde(default)]
    pub lexical_threshold: f64,
    /// Squashing constant `k` in `rank / (rank + k)`.
    #[serde(default = "default_lexical_k")]
    pub lexical_k: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_lexical: usize,
}

fn default_vector_weight() -> f64 {
    0.6
}
fn default_lexical_weight() -> f64 {
    0.4
}
fn default_vector_threshold() -> f64 {
    0.2
}
fn default_lexical_k() -> f64 {
    2.0
}
fn default_candidate_k() -> usize {
    50
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            lexical_weight: default_lexical_weight(),
            vector_threshold: default_vector_threshold(),
            lexical_threshold: 0.0,
            lexical_k: default_lexical_k(),
            candidate_k_vector: default_candidate_k(),
            candidate_k_lexical: default_candidate_k(),
        }
    }
}

impl RankingConfig {
    pub fn validate(&self) -> Result<(), RecallError> {
        for (name, value) in [
            ("vector_weight", self.vector_weight),
            ("lexical_weight", self.lexical_weight),
            ("vector_threshold", self.vector_threshold),
            ("lexical_threshold", self.lexical_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RecallError::InvalidConfig(format!(
                    "retrieval.{} must be in [0.0, 1.0], got {}",
                    name, value
                )));
            }
        }

        let sum = self.vector_weight + self.lexical_weight;
        if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(RecallError::InvalidConfig(format!(
                "retrieval.vector_weight + retrieval.lexical_weight must equal 1.0, got {}",
                sum
            )));
        }

        if !(self.lexical_k > 0.0) || !self.lexical_k.is_finite() {
            return Err(RecallError::InvalidConfig(format!(
                "retrieval.lexical_k must be a positive number, got {}",
                self.lexical_k
            )));
        }

        if self.candidate_k_vector == 0 || self.candidate_k_lexical == 0 {
            return Err(RecallError::InvalidConfig(
                "retrieval.candidate_k_vector and candidate_k_lexical must be >= 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Contextual windowing parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_window_size")]
    pub default_window_size: usize,
    /// Hard cap on adaptive growth and on asymmetric before/after.
    #[serde(default = "default_max_window_size")]
    pub max_window_size: usize,
    #[serde(default = "default_true")]
    pub adaptive: bool,
    #[serde(default = "default_true")]
    pub deduplicate: bool,
    #[serde(default = "default_results")]
    pub default_results: usize,
    /// `0` means unlimited.
    #[serde(default)]
    pub default_max_tokens: usize,
    /// Proximity decay constant λ.
    #[serde(default = "default_decay_lambda")]
    pub decay_lambda: f64,
    #[serde(default)]
    pub recency_bonus: bool,
    #[serde(default = "default_recency_half_life_days")]
    pub recency_half_life_days: f64,
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
    /// Deadline for each retrieval sub-query.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

fn default_window_size() -> usize {
    3
}
fn default_max_window_size() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_results() -> usize {
    8
}
fn default_decay_lambda() -> f64 {
    0.1
}
fn default_recency_half_life_days() -> f64 {
    30.0
}
fn default_recency_weight() -> f64 {
    0.1
}
fn default_query_timeout_ms() -> u64 {
    5_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_window_size: default_window_size(),
            max_window_size: default_max_window_size(),
            adaptive: true,
            deduplicate: true,
            default_results: default_results(),
            default_max_tokens: 0,
            decay_lambda: default_decay_lambda(),
            recency_bonus: false,
            recency_half_life_days: default_recency_half_life_days(),
            recency_weight: default_recency_weight(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl ContextConfig {
    pub fn validate(&self) -> Result<(), RecallError> {
        if self.max_window_size == 0 {
            return Err(RecallError::InvalidConfig(
                "context.max_window_size must be >= 1".to_string(),
            ));
        }
        if self.default_window_size > MAX_CONTEXT_WINDOW {
            return Err(RecallError::InvalidConfig(format!(
                "context.default_window_size must be <= {}",
                MAX_CONTEXT_WINDOW
            )));
        }
        if self.default_window_size > self.max_window_size {
            return Err(RecallError::InvalidConfig(format!(
                "context.default_window_size ({}) exceeds context.max_window_size ({})",
                self.default_window_size, self.max_window_size
            )));
        }
        if self.default_results == 0 {
            return Err(RecallError::InvalidConfig(
                "context.default_results must be >= 1".to_string(),
            ));
        }
        if !(self.decay_lambda >= 0.0) || !self.decay_lambda.is_finite() {
            return Err(RecallError::InvalidConfig(format!(
                "context.decay_lambda must be >= 0, got {}",
                self.decay_lambda
            )));
        }
        if !(self.recency_half_life_days > 0.0) {
            return Err(RecallError::InvalidConfig(
                "context.recency_half_life_days must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.recency_weight) {
            return Err(RecallError::InvalidConfig(
                "context.recency_weight must be in [0.0, 1.0]".to_string(),
            ));
        }
        if self.query_timeout_ms == 0 {
            return Err(RecallError::InvalidConfig(
                "context.query_timeout_ms must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the pipeline needs, as one immutable value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), RecallError> {
        self.ranking.validate()?;
        self.context.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_weight_sum_must_be_one() {
        let cfg = RankingConfig {
            vector_weight: 0.7,
            lexical_weight: 0.4,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(RecallError::InvalidConfig(_))));
    }

    #[test]
    fn test_weight_out_of_range() {
        let cfg = RankingConfig {
            vector_weight: 1.5,
            lexical_weight: -0.5,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(RecallError::InvalidConfig(_))));
    }

    #[test]
    fn test_nonpositive_lexical_k() {
        let cfg = RankingConfig {
            lexical_k: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_default_window_above_max() {
        let cfg = ContextConfig {
            default_window_size: 5,
            max_window_size: 4,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_negative_lambda() {
        let cfg = ContextConfig {
            decay_lambda: -0.1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
