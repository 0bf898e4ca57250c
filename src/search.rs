//! CLI search (`recall search`) and pipeline construction.
//!
//! [`build_pipeline`] is shared with the HTTP server: it wires the
//! configured embedding provider and a [`MessageStore`] into a
//! [`RecallPipeline`].

use std::sync::Arc;

use anyhow::{bail, Result};

use chat_recall_core::api::{
    LegacyResult, SearchMode, SearchRequest, SearchResponse, SearchResults, WindowResult,
};
use chat_recall_core::embedding::Embedder;
use chat_recall_core::store::MessageStore;
use chat_recall_core::RecallPipeline;

use crate::config::{Config, EmbeddingConfig};
use crate::db;
use crate::embedding::{self, ProviderEmbedder};
use crate::sqlite_store::SqliteStore;

/// Flags of `recall search`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub mode: SearchMode,
    /// Symmetric window; presence selects contextual output.
    pub context: Option<usize>,
    pub before: Option<usize>,
    pub after: Option<usize>,
    pub limit: Option<usize>,
    pub max_tokens: Option<usize>,
    pub no_dedup: bool,
    pub no_adaptive: bool,
    pub no_markers: bool,
    pub json: bool,
}

impl SearchOptions {
    /// Translate flags into a pipeline request. `--before`/`--after` alone
    /// also select contextual mode.
    pub fn to_request(&self, query: &str) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            context_window: self.context,
            use_contextual: self.before.is_some() || self.after.is_some(),
            n_results: self.limit,
            adaptive_context: self.no_adaptive.then_some(false),
            asymmetric_before: self.before,
            asymmetric_after: self.after,
            deduplicate: self.no_dedup.then_some(false),
            max_tokens: self.max_tokens,
            include_markers: !self.no_markers,
            mode: self.mode,
            timeout_ms: None,
        }
    }
}

/// Build a pipeline over `store` using the configured embedding provider.
///
/// Query embeddings get a single attempt: an unreachable provider fails the
/// request as unavailable instead of backing off until the deadline. Retry
/// with backoff stays on the backfill path.
pub fn build_pipeline(config: &Config, store: Arc<dyn MessageStore>) -> Result<RecallPipeline> {
    let query_config = EmbeddingConfig {
        max_retries: 0,
        ..config.embedding.clone()
    };
    let provider = embedding::create_provider(&query_config)?;
    let embedder: Arc<dyn Embedder> = Arc::new(ProviderEmbedder::new(provider));
    let pipeline = RecallPipeline::new(config.pipeline_config(), store, embedder)?;
    Ok(pipeline)
}

/// CLI entry point.
pub async fn run_search(config: &Config, query: &str, options: &SearchOptions) -> Result<()> {
    if options.mode != SearchMode::Lexical && !config.embedding.is_enabled() {
        bail!(
            "Mode '{}' requires embeddings. Configure [embedding] provider or use --mode lexical.",
            options.mode.as_str()
        );
    }

    let pool = db::connect(config).await?;
    let store: Arc<dyn MessageStore> = Arc::new(SqliteStore::new(pool.clone()));
    let pipeline = build_pipeline(config, store)?;

    let response = pipeline.search(&options.to_request(query)).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }

    pool.close().await;
    Ok(())
}

fn print_response(response: &SearchResponse) {
    if response.results.is_empty() {
        println!("No results.");
        return;
    }

    match &response.results {
        SearchResults::Contextual(windows) => {
            for (i, window) in windows.iter().enumerate() {
                print_window(i + 1, window);
            }
        }
        SearchResults::Legacy(entries) => {
            for (i, entry) in entries.iter().enumerate() {
                print_entry(i + 1, entry);
            }
        }
    }
}

fn print_window(rank: usize, window: &WindowResult) {
    let meta = &window.metadata;
    let roles: Vec<&str> = meta.roles.iter().map(|r| r.as_str()).collect();

    println!(
        "{}. [{:.2}] {} (messages {}-{})",
        rank, window.relevance, meta.conversation_id, meta.start_index, meta.end_index
    );
    println!("    match: {}", meta.matched_message_id);
    if meta.merged_matches.len() > 1 {
        println!("    merged: {}", meta.merged_matches.join(", "));
    }
    println!("    roles: {}", roles.join(", "));
    println!(
        "    tokens: {}{}",
        meta.token_estimate,
        if meta.trimmed { " (trimmed)" } else { "" }
    );
    println!();
    for line in window.content.lines() {
        println!("    {}", line);
    }
    println!();
}

fn print_entry(rank: usize, entry: &LegacyResult) {
    let title = entry.title.as_deref().unwrap_or("(untitled)");
    println!("{}. [{:.2}] {}", rank, entry.relevance, title);
    println!("    role: {}", entry.role);
    println!("    created: {}", entry.created_at);
    println!(
        "    excerpt: \"{}\"",
        entry.preview.replace('\n', " ").trim()
    );
    println!("    id: {}", entry.id);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_flags_give_legacy_request() {
        let req = SearchOptions::default().to_request("tomatoes");
        assert!(!req.is_contextual());
        assert!(req.include_markers);
        assert_eq!(req.deduplicate, None);
    }

    #[test]
    fn test_context_flags() {
        let opts = SearchOptions {
            context: Some(2),
            no_dedup: true,
            no_markers: true,
            ..Default::default()
        };
        let req = opts.to_request("tomatoes");
        assert!(req.is_contextual());
        assert_eq!(req.context_window, Some(2));
        assert_eq!(req.deduplicate, Some(false));
        assert!(!req.include_markers);
    }

    #[test]
    fn test_asymmetric_flags_select_contextual() {
        let opts = SearchOptions {
            after: Some(4),
            ..Default::default()
        };
        let req = opts.to_request("q");
        assert!(req.is_contextual());
        assert_eq!(req.asymmetric_after, Some(4));
        assert_eq!(req.asymmetric_before, None);
    }
}
