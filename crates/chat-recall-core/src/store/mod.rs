//! Storage abstraction for Chat Recall.
//!
//! The [`MessageStore`] trait is everything the retrieval core needs from
//! the relational store, plus the small write surface used by import and
//! embedding backfill. Conversation CRUD (upload, list, delete, export)
//! stays outside; cascading deletes are the store's own invariant.
//!
//! Implementations must be `Send + Sync` so one store can serve concurrent
//! requests; the store owns its own concurrency control.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Candidate, Conversation, Message, NewMessage};

/// Abstract message store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_conversation`](MessageStore::upsert_conversation) | Insert or update a conversation header |
/// | [`insert_message`](MessageStore::insert_message) | Insert an imported message (and its vector, if any) |
/// | [`replace_conversation`](MessageStore::replace_conversation) | Atomically swap in a conversation's full message set |
/// | [`upsert_embedding`](MessageStore::upsert_embedding) | Store or replace a message's vector |
/// | [`messages_missing_embeddings`](MessageStore::messages_missing_embeddings) | Backfill work list |
/// | [`get_conversation`](MessageStore::get_conversation) | Conversation header by id |
/// | [`get_message`](MessageStore::get_message) | Single message by id |
/// | [`conversation_messages`](MessageStore::conversation_messages) | All messages of a conversation, ordered |
/// | [`vector_search`](MessageStore::vector_search) | Cosine-ranked candidates |
/// | [`lexical_search`](MessageStore::lexical_search) | Full-text ranked candidates |
/// | [`counts`](MessageStore::counts) | Conversation and message totals |
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Insert a message. Re-inserting an existing id replaces it.
    async fn insert_message(&self, message: &NewMessage) -> Result<()>;

    /// Upsert `conversation` and make `messages` its complete message set.
    ///
    /// All-or-nothing: previous messages absent from `messages` are removed
    /// along with their vectors, and a failure leaves the stored
    /// conversation untouched.
    async fn replace_conversation(
        &self,
        conversation: &Conversation,
        messages: &[NewMessage],
    ) -> Result<()>;

    async fn upsert_embedding(&self, message_id: &str, vector: &[f32], model: &str) -> Result<()>;

    /// Non-empty messages without a stored vector, oldest first.
    async fn messages_missing_embeddings(&self, limit: Option<usize>) -> Result<Vec<Message>>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    async fn get_message(&self, id: &str) -> Result<Option<Message>>;

    /// Every message of the conversation, ordered by `(created_at, id)`.
    async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Top `limit` messages by cosine similarity, descending. Messages with
    /// empty content are excluded. `raw_score` is the cosine similarity.
    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<Candidate>>;

    /// Top `limit` messages by lexical relevance, descending. Messages with
    /// empty content are excluded. `raw_score` is positive, higher = better.
    async fn lexical_search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>>;

    /// `(conversations, messages)` totals, for health reporting.
    async fn counts(&self) -> Result<(i64, i64)>;
}

/// Split a free-text query into lowercase alphanumeric terms.
///
/// Shared by the in-memory scorer and the SQLite FTS5 query builder so both
/// backends see the same terms.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_terms_strip_punctuation() {
        assert_eq!(
            query_terms("What's \"Rust\" ownership?"),
            vec!["what", "s", "rust", "ownership"]
        );
        assert!(query_terms("  --  ").is_empty());
    }
}
