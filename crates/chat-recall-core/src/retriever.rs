//! Candidate retrieval.
//!
//! Issues the vector and lexical sub-queries against a [`MessageStore`].
//! The two sub-queries share no state, so they run concurrently and are
//! joined before ranking; each is bounded by the request deadline.
//!
//! Failures are never retried here. A store or embedder error becomes
//! [`RecallError::RetrievalUnavailable`], a deadline overrun becomes
//! [`RecallError::RetrievalTimeout`], and either fails the whole request:
//! no partial candidate list is returned as if it were complete.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::embedding::Embedder;
use crate::error::RecallError;
use crate::models::{Candidate, ScoreSource};
use crate::store::MessageStore;

/// The closed set of ranking strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Embed the query, rank by cosine similarity.
    Vector,
    /// Rank with the store's native full-text scoring.
    Lexical,
}

impl SearchStrategy {
    pub fn source(&self) -> ScoreSource {
        match self {
            SearchStrategy::Vector => ScoreSource::Vector,
            SearchStrategy::Lexical => ScoreSource::Lexical,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SearchStrategy::Vector => "vector",
            SearchStrategy::Lexical => "lexical",
        }
    }

    /// Fetch up to `limit` candidates, descending by raw score.
    pub async fn fetch(
        &self,
        store: &dyn MessageStore,
        embedder: &dyn Embedder,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, RecallError> {
        let unavailable = |e: anyhow::Error| RecallError::RetrievalUnavailable {
            source_kind: self.label(),
            message: format!("{:#}", e),
        };

        let mut candidates = match self {
            SearchStrategy::Vector => {
                let query_vec = embedder.embed(query).await.map_err(unavailable)?;
                store
                    .vector_search(&query_vec, limit)
                    .await
                    .map_err(unavailable)?
            }
            SearchStrategy::Lexical => store
                .lexical_search(query, limit)
                .await
                .map_err(unavailable)?,
        };

        candidates.retain(|c| c.source == self.source());
        candidates.truncate(limit);
        Ok(candidates)
    }
}

/// Which sub-queries a request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalPlan {
    pub vector: bool,
    pub lexical: bool,
}

impl RetrievalPlan {
    pub const HYBRID: RetrievalPlan = RetrievalPlan {
        vector: true,
        lexical: true,
    };
}

/// Issues the sub-queries for one request.
pub struct CandidateRetriever<'a> {
    store: &'a dyn MessageStore,
    embedder: &'a dyn Embedder,
}

impl<'a> CandidateRetriever<'a> {
    pub fn new(store: &'a dyn MessageStore, embedder: &'a dyn Embedder) -> Self {
        Self { store, embedder }
    }

    /// Returns `(vector_candidates, lexical_candidates)`.
    ///
    /// Sub-queries excluded by `plan` return empty lists without touching
    /// the store or the embedder.
    pub async fn retrieve(
        &self,
        query_text: &str,
        top_k_vector: usize,
        top_k_lexical: usize,
        plan: RetrievalPlan,
        deadline: Duration,
    ) -> Result<(Vec<Candidate>, Vec<Candidate>), RecallError> {
        let vector = async {
            if !plan.vector || top_k_vector == 0 {
                return Ok(Vec::new());
            }
            with_deadline(
                SearchStrategy::Vector,
                deadline,
                SearchStrategy::Vector.fetch(self.store, self.embedder, query_text, top_k_vector),
            )
            .await
        };
        let lexical = async {
            if !plan.lexical || top_k_lexical == 0 {
                return Ok(Vec::new());
            }
            with_deadline(
                SearchStrategy::Lexical,
                deadline,
                SearchStrategy::Lexical.fetch(self.store, self.embedder, query_text, top_k_lexical),
            )
            .await
        };

        let (vector_candidates, lexical_candidates) = tokio::try_join!(vector, lexical)?;

        debug!(
            vector = vector_candidates.len(),
            lexical = lexical_candidates.len(),
            "retrieved candidates"
        );
        Ok((vector_candidates, lexical_candidates))
    }
}

async fn with_deadline<F>(
    strategy: SearchStrategy,
    deadline: Duration,
    fut: F,
) -> Result<Vec<Candidate>, RecallError>
where
    F: Future<Output = Result<Vec<Candidate>, RecallError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(RecallError::RetrievalTimeout {
            source_kind: strategy.label(),
            timeout_ms: deadline.as_millis() as u64,
        }),
    }
}
