//! In-memory [`MessageStore`] implementation for tests and embedding.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity; lexical search is a log-scaled term-frequency score
//! over the same terms the SQLite backend hands to FTS5.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{
    sort_conversation, Candidate, Conversation, Message, NewMessage, ScoreSource,
};

use super::{query_terms, MessageStore};

struct StoredVector {
    vector: Vec<f32>,
    _model: String,
}

/// In-memory store.
pub struct InMemoryStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    messages: RwLock<HashMap<String, Message>>,
    vectors: RwLock<HashMap<String, StoredVector>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
            vectors: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

/// Descending score, ascending id. Keeps equal-score candidates stable
/// across runs even though `HashMap` iteration order is not.
fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
}

fn term_score(text: &str, terms: &[String]) -> f64 {
    let words = query_terms(text);
    terms
        .iter()
        .map(|t| {
            let tf = words.iter().filter(|w| *w == t).count() as f64;
            (1.0 + tf).ln()
        })
        .sum()
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<()> {
        write(&self.conversations)?.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<()> {
        let msg = &message.message;
        if !read(&self.conversations)?.contains_key(&msg.conversation_id) {
            anyhow::bail!(
                "message {} references unknown conversation {}",
                msg.id,
                msg.conversation_id
            );
        }
        write(&self.messages)?.insert(msg.id.clone(), msg.clone());
        let mut vectors = write(&self.vectors)?;
        match &message.embedding {
            Some(v) => {
                vectors.insert(
                    msg.id.clone(),
                    StoredVector {
                        vector: v.clone(),
                        _model: String::new(),
                    },
                );
            }
            None => {
                vectors.remove(&msg.id);
            }
        }
        Ok(())
    }

    async fn replace_conversation(
        &self,
        conversation: &Conversation,
        messages: &[NewMessage],
    ) -> Result<()> {
        if let Some(stray) = messages
            .iter()
            .find(|m| m.message.conversation_id != conversation.id)
        {
            anyhow::bail!(
                "message {} belongs to conversation {}, not {}",
                stray.message.id,
                stray.message.conversation_id,
                conversation.id
            );
        }

        // Lock order matches the readers: conversations, messages, vectors.
        let mut conversations = write(&self.conversations)?;
        let mut stored = write(&self.messages)?;
        let mut vectors = write(&self.vectors)?;

        let previous: Vec<String> = stored
            .values()
            .filter(|m| m.conversation_id == conversation.id)
            .map(|m| m.id.clone())
            .collect();
        for id in &previous {
            stored.remove(id);
            vectors.remove(id);
        }

        conversations.insert(conversation.id.clone(), conversation.clone());
        for new in messages {
            let msg = &new.message;
            stored.insert(msg.id.clone(), msg.clone());
            match &new.embedding {
                Some(v) => {
                    vectors.insert(
                        msg.id.clone(),
                        StoredVector {
                            vector: v.clone(),
                            _model: String::new(),
                        },
                    );
                }
                None => {
                    vectors.remove(&msg.id);
                }
            }
        }
        Ok(())
    }

    async fn upsert_embedding(&self, message_id: &str, vector: &[f32], model: &str) -> Result<()> {
        if !read(&self.messages)?.contains_key(message_id) {
            anyhow::bail!("message not found: {}", message_id);
        }
        write(&self.vectors)?.insert(
            message_id.to_string(),
            StoredVector {
                vector: vector.to_vec(),
                _model: model.to_string(),
            },
        );
        Ok(())
    }

    async fn messages_missing_embeddings(&self, limit: Option<usize>) -> Result<Vec<Message>> {
        let messages = read(&self.messages)?;
        let vectors = read(&self.vectors)?;
        let mut missing: Vec<Message> = messages
            .values()
            .filter(|m| !m.content.trim().is_empty() && !vectors.contains_key(&m.id))
            .cloned()
            .collect();
        sort_conversation(&mut missing);
        if let Some(limit) = limit {
            missing.truncate(limit);
        }
        Ok(missing)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(read(&self.conversations)?.get(id).cloned())
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        Ok(read(&self.messages)?.get(id).cloned())
    }

    async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut msgs: Vec<Message> = read(&self.messages)?
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        sort_conversation(&mut msgs);
        Ok(msgs)
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<Candidate>> {
        let messages = read(&self.messages)?;
        let vectors = read(&self.vectors)?;
        let mut candidates: Vec<Candidate> = vectors
            .iter()
            .filter_map(|(id, sv)| {
                let msg = messages.get(id)?;
                if msg.content.trim().is_empty() {
                    return None;
                }
                Some(Candidate {
                    message_id: id.clone(),
                    conversation_id: msg.conversation_id.clone(),
                    raw_score: cosine_similarity(query_vec, &sv.vector) as f64,
                    source: ScoreSource::Vector,
                })
            })
            .collect();
        sort_candidates(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn lexical_search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let messages = read(&self.messages)?;
        let mut candidates: Vec<Candidate> = messages
            .values()
            .filter(|m| !m.content.trim().is_empty())
            .filter_map(|m| {
                let score = term_score(&m.content, &terms);
                (score > 0.0).then(|| Candidate {
                    message_id: m.id.clone(),
                    conversation_id: m.conversation_id.clone(),
                    raw_score: score,
                    source: ScoreSource::Lexical,
                })
            })
            .collect();
        sort_candidates(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn counts(&self) -> Result<(i64, i64)> {
        let conversations = read(&self.conversations)?.len() as i64;
        let messages = read(&self.messages)?.len() as i64;
        Ok((conversations, messages))
    }
}
