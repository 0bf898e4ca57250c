//! The retrieval pipeline.
//!
//! [`RecallPipeline`] owns the validated configuration and wires the stages
//! together for each request:
//!
//! ```text
//! retrieve ─▶ rank ─┬─▶ expand ─▶ decay ─▶ dedup ─▶ budget ─▶ render   (contextual)
//!                   └─▶ message lookup                               (legacy)
//! ```
//!
//! The pipeline holds no per-request state, so one instance can serve many
//! concurrent requests against the same store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};

use crate::api::{
    preview, LegacyResult, SearchMode, SearchRequest, SearchResponse, SearchResults,
    WindowMetadata, WindowResult, MAX_RESULTS,
};
use crate::budget::{enforce_budget, window_tokens};
use crate::config::{PipelineConfig, MAX_CONTEXT_WINDOW};
use crate::decay::{apply_proximity_decay, apply_recency_bonus};
use crate::dedup::{deduplicate, sort_windows};
use crate::embedding::Embedder;
use crate::error::RecallError;
use crate::models::{sort_conversation, Message, RankedMatch, Window};
use crate::ranker::{HybridRanker, Weights};
use crate::render::render;
use crate::retriever::{CandidateRetriever, RetrievalPlan};
use crate::store::MessageStore;
use crate::window::{expand, ExpandOptions};

/// Request parameters after defaults and validation.
#[derive(Debug, Clone)]
struct Resolved {
    n_results: usize,
    deadline: Duration,
    plan: RetrievalPlan,
    weights: Weights,
    context: Option<ContextParams>,
}

#[derive(Debug, Clone, Copy)]
struct ContextParams {
    expand: ExpandOptions,
    deduplicate: bool,
    max_tokens: usize,
    include_markers: bool,
}

/// Hybrid contextual retrieval over a [`MessageStore`].
pub struct RecallPipeline {
    config: PipelineConfig,
    ranker: HybridRanker,
    store: Arc<dyn MessageStore>,
    embedder: Arc<dyn Embedder>,
}

impl RecallPipeline {
    /// Validate `config` and build the pipeline.
    ///
    /// Fails with [`RecallError::InvalidConfig`]; a process that gets this
    /// error must not serve requests.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn MessageStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, RecallError> {
        config.validate()?;
        let ranker = HybridRanker::new(&config.ranking)?;
        Ok(Self {
            config,
            ranker,
            store,
            embedder,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Run `request` with the wall clock as the recency reference.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, RecallError> {
        self.search_at(request, Utc::now()).await
    }

    /// Run `request` as of `now`.
    pub async fn search_at(
        &self,
        request: &SearchRequest,
        now: DateTime<Utc>,
    ) -> Result<SearchResponse, RecallError> {
        let resolved = self.resolve(request)?;
        let query = request.query.trim();

        let retriever = CandidateRetriever::new(self.store.as_ref(), self.embedder.as_ref());
        let (vector, lexical) = retriever
            .retrieve(
                query,
                self.config.ranking.candidate_k_vector,
                self.config.ranking.candidate_k_lexical,
                resolved.plan,
                resolved.deadline,
            )
            .await?;

        let ranked =
            self.ranker
                .rank_weighted(&vector, &lexical, resolved.weights, resolved.n_results);

        let results = match resolved.context {
            Some(params) => SearchResults::Contextual(self.contextual(&ranked, params, now).await?),
            None => SearchResults::Legacy(self.legacy(&ranked).await?),
        };

        info!(
            mode = request.mode.as_str(),
            contextual = resolved.context.is_some(),
            results = results.len(),
            "search complete"
        );

        Ok(SearchResponse {
            query: query.to_string(),
            mode: request.mode,
            contextual: resolved.context.is_some(),
            results,
        })
    }

    fn resolve(&self, request: &SearchRequest) -> Result<Resolved, RecallError> {
        let ctx = &self.config.context;

        if request.query.trim().is_empty() {
            return Err(RecallError::invalid_param("query must not be empty"));
        }

        let n_results = request.n_results.unwrap_or(ctx.default_results);
        if n_results == 0 || n_results > MAX_RESULTS {
            return Err(RecallError::invalid_param(format!(
                "n_results must be between 1 and {}, got {}",
                MAX_RESULTS, n_results
            )));
        }

        let timeout_ms = request.timeout_ms.unwrap_or(ctx.query_timeout_ms);
        if timeout_ms == 0 {
            return Err(RecallError::invalid_param("timeout_ms must be >= 1"));
        }

        let (plan, weights) = match request.mode {
            SearchMode::Hybrid => (RetrievalPlan::HYBRID, self.ranker.weights()),
            SearchMode::Semantic => (
                RetrievalPlan {
                    vector: true,
                    lexical: false,
                },
                Weights {
                    vector: 1.0,
                    lexical: 0.0,
                },
            ),
            SearchMode::Lexical => (
                RetrievalPlan {
                    vector: false,
                    lexical: true,
                },
                Weights {
                    vector: 0.0,
                    lexical: 1.0,
                },
            ),
        };

        let context = if request.is_contextual() {
            let window = request.context_window.unwrap_or(ctx.default_window_size);
            if window > MAX_CONTEXT_WINDOW {
                return Err(RecallError::invalid_param(format!(
                    "context_window must be between 0 and {}, got {}",
                    MAX_CONTEXT_WINDOW, window
                )));
            }
            let before = request.asymmetric_before.unwrap_or(window);
            let after = request.asymmetric_after.unwrap_or(window);
            for (name, given, value) in [
                ("asymmetric_before", request.asymmetric_before, before),
                ("asymmetric_after", request.asymmetric_after, after),
            ] {
                // Report the field the caller actually set.
                let name = if given.is_some() { name } else { "context_window" };
                if value > ctx.max_window_size {
                    return Err(RecallError::invalid_param(format!(
                        "{} must be <= max window size {}, got {}",
                        name, ctx.max_window_size, value
                    )));
                }
            }
            Some(ContextParams {
                expand: ExpandOptions {
                    before,
                    after,
                    adaptive: request.adaptive_context.unwrap_or(ctx.adaptive),
                    max_window_size: ctx.max_window_size,
                },
                deduplicate: request.deduplicate.unwrap_or(ctx.deduplicate),
                max_tokens: request.max_tokens.unwrap_or(ctx.default_max_tokens),
                include_markers: request.include_markers,
            })
        } else {
            None
        };

        Ok(Resolved {
            n_results,
            deadline: Duration::from_millis(timeout_ms),
            plan,
            weights,
            context,
        })
    }

    async fn contextual(
        &self,
        ranked: &[RankedMatch],
        params: ContextParams,
        now: DateTime<Utc>,
    ) -> Result<Vec<WindowResult>, RecallError> {
        let ctx = &self.config.context;

        // Each conversation is loaded once per request, however many
        // matches it holds.
        let mut conversations: HashMap<&str, Vec<Message>> = HashMap::new();
        let mut windows = Vec::with_capacity(ranked.len());
        for m in ranked {
            if !conversations.contains_key(m.conversation_id.as_str()) {
                let messages = self.load_conversation(&m.conversation_id).await?;
                conversations.insert(m.conversation_id.as_str(), messages);
            }
            let messages = conversations
                .get(m.conversation_id.as_str())
                .ok_or_else(|| RecallError::invariant("conversation cache miss"))?;

            let mut window = expand(m, messages, &params.expand)?;
            window = apply_proximity_decay(window, ctx.decay_lambda);
            if ctx.recency_bonus {
                window = apply_recency_bonus(
                    window,
                    now,
                    ctx.recency_half_life_days,
                    ctx.recency_weight,
                );
            }
            windows.push(window);
        }

        let expanded = windows.len();
        if params.deduplicate {
            windows = deduplicate(windows)?;
        } else {
            sort_windows(&mut windows);
        }
        debug!(
            expanded,
            final_windows = windows.len(),
            "windows assembled"
        );

        windows
            .into_iter()
            .map(|w| {
                let w = enforce_budget(w, params.max_tokens)?;
                window_result(&w, params.include_markers)
            })
            .collect()
    }

    async fn legacy(&self, ranked: &[RankedMatch]) -> Result<Vec<LegacyResult>, RecallError> {
        let mut titles: HashMap<&str, Option<String>> = HashMap::new();
        let mut results = Vec::with_capacity(ranked.len());

        for m in ranked {
            let message = self
                .store
                .get_message(&m.message_id)
                .await
                .map_err(store_unavailable)?
                .ok_or_else(|| {
                    RecallError::invariant(format!("ranked message {} not in store", m.message_id))
                })?;

            if !titles.contains_key(m.conversation_id.as_str()) {
                let title = self
                    .store
                    .get_conversation(&m.conversation_id)
                    .await
                    .map_err(store_unavailable)?
                    .and_then(|c| c.title);
                titles.insert(m.conversation_id.as_str(), title);
            }

            results.push(LegacyResult {
                preview: preview(&message.content),
                title: titles.get(m.conversation_id.as_str()).cloned().flatten(),
                id: message.id,
                conversation_id: message.conversation_id,
                role: message.role,
                created_at: message
                    .created_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
                content: message.content,
                relevance: m.combined_score,
                vector_score: m.vector_score,
                lexical_score: m.lexical_score,
            });
        }
        Ok(results)
    }

    async fn load_conversation(&self, conversation_id: &str) -> Result<Vec<Message>, RecallError> {
        let mut messages = self
            .store
            .conversation_messages(conversation_id)
            .await
            .map_err(store_unavailable)?;
        sort_conversation(&mut messages);
        Ok(messages)
    }
}

fn store_unavailable(e: anyhow::Error) -> RecallError {
    RecallError::RetrievalUnavailable {
        source_kind: "store",
        message: format!("{:#}", e),
    }
}

fn window_result(window: &Window, include_markers: bool) -> Result<WindowResult, RecallError> {
    let matched = window.matched_message().ok_or_else(|| {
        RecallError::invariant(format!(
            "window for conversation {} lost its matched message",
            window.conversation_id
        ))
    })?;
    let span = window.span();

    Ok(WindowResult {
        window_id: format!("{}:{}", window.conversation_id, matched.id),
        content: render(window, include_markers),
        relevance: window.aggregated_score,
        metadata: WindowMetadata {
            conversation_id: window.conversation_id.clone(),
            matched_message_id: matched.id.clone(),
            window_size: window.len(),
            match_position: window.match_position,
            before_count: window.before_count(),
            after_count: window.after_count(),
            base_score: window.base_score,
            aggregated_score: window.aggregated_score,
            roles: window.roles(),
            token_estimate: window_tokens(window),
            start_index: span.start,
            end_index: span.end,
            trimmed: window.trimmed,
            merged_matches: window.matched_ids.clone(),
            vector_score: window.vector_score,
            lexical_score: window.lexical_score,
        },
    })
}
