//! Core data models for Chat Recall.
//!
//! Persistent entities ([`Conversation`], [`Message`]) are produced by the
//! import side and treated as immutable here. Transient entities
//! ([`Candidate`], [`RankedMatch`], [`Window`], [`Span`]) live for exactly one
//! retrieval request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Author role of a message. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" | "human" => Ok(Role::User),
            "assistant" | "ai" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => anyhow::bail!("unknown message role: '{}'", other),
        }
    }
}

/// A single imported message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque unique identifier.
    pub id: String,
    /// Owning conversation.
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Total order within a conversation: `(created_at, id)`.
    ///
    /// Some import sources stamp a whole exchange with one timestamp, so the
    /// identifier breaks ties.
    pub fn conversation_order(a: &Message, b: &Message) -> Ordering {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Sort a conversation's messages into their canonical order.
pub fn sort_conversation(messages: &mut [Message]) {
    messages.sort_by(Message::conversation_order);
}

/// A named conversation. Owns its messages in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A message as delivered by the import side, optionally with a
/// precomputed embedding.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub message: Message,
    pub embedding: Option<Vec<f32>>,
}

/// Which ranking signal produced a [`Candidate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSource {
    Vector,
    Lexical,
}

/// A single-source scored match, before hybrid combination.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub message_id: String,
    pub conversation_id: String,
    /// Cosine similarity for vector candidates, positive BM25 relevance for
    /// lexical ones.
    pub raw_score: f64,
    pub source: ScoreSource,
}

/// A message after hybrid ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatch {
    pub message_id: String,
    pub conversation_id: String,
    pub combined_score: f64,
    /// Normalized vector score, if the message was a vector candidate.
    pub vector_score: Option<f64>,
    /// Normalized lexical score, if the message was a lexical candidate.
    pub lexical_score: Option<f64>,
}

/// Index interval `[start, end]` (inclusive) in a conversation's ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Overlap test, shared indices included.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn merge(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A contiguous slice of one conversation around a matched message.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub conversation_id: String,
    /// Messages in conversation order.
    pub messages: Vec<Message>,
    /// Index of `messages[0]` within the full conversation.
    pub start_index: usize,
    /// Position of the matched message inside `messages`.
    pub match_position: usize,
    pub base_score: f64,
    pub aggregated_score: f64,
    pub vector_score: Option<f64>,
    pub lexical_score: Option<f64>,
    /// Ids of every matched message folded into this window.
    pub matched_ids: Vec<String>,
    /// Set when the budget enforcer removed messages or cut content.
    pub trimmed: bool,
}

impl Window {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn span(&self) -> Span {
        Span::new(
            self.start_index,
            self.start_index + self.messages.len().saturating_sub(1),
        )
    }

    pub fn matched_message(&self) -> Option<&Message> {
        self.messages.get(self.match_position)
    }

    /// Index of the matched message within the full conversation.
    pub fn match_index(&self) -> usize {
        self.start_index + self.match_position
    }

    pub fn before_count(&self) -> usize {
        self.match_position
    }

    pub fn after_count(&self) -> usize {
        self.messages
            .len()
            .saturating_sub(self.match_position + 1)
    }

    pub fn roles(&self) -> Vec<Role> {
        self.messages.iter().map(|m| m.role).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(id: &str, secs: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            role: Role::User,
            content: String::new(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_sort_conversation_tie_breaks_by_id() {
        let mut msgs = vec![msg("b", 10), msg("a", 10), msg("c", 5)];
        sort_conversation(&mut msgs);
        let ids: Vec<&str> = msgs.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_span_touching_overlaps() {
        assert!(Span::new(0, 4).overlaps(&Span::new(4, 6)));
        assert!(!Span::new(0, 3).overlaps(&Span::new(4, 6)));
        assert_eq!(Span::new(2, 6).merge(&Span::new(0, 4)), Span::new(0, 6));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!("human".parse::<Role>().unwrap(), Role::User);
        assert!("tool".parse::<Role>().is_err());
    }
}
