//! Request and response shapes exchanged with the service layer.
//!
//! A [`SearchRequest`] selects one of two code paths:
//!
//! - **contextual**, when `context_window` is present or `use_contextual` is
//!   set: one [`WindowResult`] per final window;
//! - **legacy** otherwise: one [`LegacyResult`] per matched message,
//!   unexpanded. Legacy entries have no `window_id` and no `roles`.

use serde::{Deserialize, Serialize};

use crate::models::Role;

/// Upper bound on `n_results`.
pub const MAX_RESULTS: usize = 100;

/// Length of the legacy `preview` field, in characters.
pub const PREVIEW_CHARS: usize = 500;

/// Which retrieval signals a request uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Hybrid,
    Semantic,
    Lexical,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Hybrid => "hybrid",
            SearchMode::Semantic => "semantic",
            SearchMode::Lexical => "lexical",
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid" => Ok(SearchMode::Hybrid),
            "semantic" | "vector" => Ok(SearchMode::Semantic),
            "lexical" | "keyword" => Ok(SearchMode::Lexical),
            other => Err(format!(
                "unknown search mode: {}. Use hybrid, semantic, or lexical.",
                other
            )),
        }
    }
}

/// One retrieval request.
///
/// Optional fields left unset fall back to the pipeline's configured
/// defaults when the request is resolved.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Presence enables contextual mode. `0..=10`.
    #[serde(default)]
    pub context_window: Option<usize>,
    #[serde(default)]
    pub use_contextual: bool,
    #[serde(default)]
    pub n_results: Option<usize>,
    #[serde(default)]
    pub adaptive_context: Option<bool>,
    /// Overrides the `before` half of `context_window`.
    #[serde(default)]
    pub asymmetric_before: Option<usize>,
    /// Overrides the `after` half of `context_window`.
    #[serde(default)]
    pub asymmetric_after: Option<usize>,
    #[serde(default)]
    pub deduplicate: Option<bool>,
    /// `0` means unlimited.
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default = "default_true")]
    pub include_markers: bool,
    #[serde(default)]
    pub mode: SearchMode,
    /// Per-request retrieval deadline.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl SearchRequest {
    /// A legacy-mode request for `query` with every other field defaulted.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            include_markers: true,
            ..Default::default()
        }
    }

    /// A contextual request with the given symmetric window.
    pub fn contextual(query: impl Into<String>, context_window: usize) -> Self {
        Self {
            context_window: Some(context_window),
            ..Self::new(query)
        }
    }

    pub fn is_contextual(&self) -> bool {
        self.context_window.is_some() || self.use_contextual
    }
}

/// Explainable metadata attached to each window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowMetadata {
    pub conversation_id: String,
    pub matched_message_id: String,
    pub window_size: usize,
    pub match_position: usize,
    pub before_count: usize,
    pub after_count: usize,
    pub base_score: f64,
    pub aggregated_score: f64,
    pub roles: Vec<Role>,
    pub token_estimate: usize,
    pub start_index: usize,
    pub end_index: usize,
    pub trimmed: bool,
    /// Every matched message folded into this window.
    pub merged_matches: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f64>,
}

/// One contextual result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowResult {
    /// `<conversation_id>:<matched_message_id>`.
    pub window_id: String,
    pub content: String,
    pub relevance: f64,
    pub metadata: WindowMetadata,
}

/// One legacy result: a matched message, unexpanded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyResult {
    pub id: String,
    pub conversation_id: String,
    pub title: Option<String>,
    pub role: Role,
    pub created_at: String,
    pub content: String,
    pub preview: String,
    pub relevance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f64>,
}

/// Results of either code path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchResults {
    Contextual(Vec<WindowResult>),
    Legacy(Vec<LegacyResult>),
}

impl SearchResults {
    pub fn len(&self) -> usize {
        match self {
            SearchResults::Contextual(r) => r.len(),
            SearchResults::Legacy(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub mode: SearchMode,
    pub contextual: bool,
    pub results: SearchResults,
}

/// First [`PREVIEW_CHARS`] characters, with `...` appended when cut.
pub fn preview(content: &str) -> String {
    let mut chars = content.char_indices();
    match chars.nth(PREVIEW_CHARS) {
        Some((byte_idx, _)) => format!("{}...", &content[..byte_idx]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_from_json() {
        let req: SearchRequest = serde_json::from_str(r#"{"query": "tomatoes"}"#).unwrap();
        assert!(!req.is_contextual());
        assert!(req.include_markers);
        assert_eq!(req.mode, SearchMode::Hybrid);
        assert_eq!(req.n_results, None);

        let req: SearchRequest =
            serde_json::from_str(r#"{"query": "q", "context_window": 0, "mode": "lexical"}"#)
                .unwrap();
        assert!(req.is_contextual());
        assert_eq!(req.mode, SearchMode::Lexical);
    }

    #[test]
    fn test_preview_cuts_on_char_boundary() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(PREVIEW_CHARS + 10);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview(&"a".repeat(PREVIEW_CHARS)), "a".repeat(PREVIEW_CHARS));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("keyword".parse::<SearchMode>().unwrap(), SearchMode::Lexical);
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }
}
