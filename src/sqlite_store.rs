//! SQLite-backed [`MessageStore`] implementation.
//!
//! Lexical search is FTS5 with its built-in BM25 ranking; FTS5 reports
//! `rank` as a negative number (lower is better), so the candidate's raw
//! score is `-rank`. Vector search is brute-force cosine similarity over
//! the `message_vectors` BLOBs.
//!
//! Timestamps are stored as Unix milliseconds.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use chat_recall_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use chat_recall_core::models::{Candidate, Conversation, Message, NewMessage, Role, ScoreSource};
use chat_recall_core::store::{query_terms, MessageStore};

/// SQLite implementation of the [`MessageStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Build an FTS5 `MATCH` expression: each term quoted, OR-joined.
///
/// Quoting keeps FTS5 operators and column filters in user input inert.
/// Returns `None` when the query has no searchable terms.
pub fn fts_query(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let role: String = row.get("role");
    Ok(Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: role.parse::<Role>()?,
        content: row.get("content"),
        created_at: from_millis(row.get("created_at"))?,
    })
}

fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                created_at = excluded.created_at
            "#,
        )
        .bind(&conversation.id)
        .bind(&conversation.title)
        .bind(conversation.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_message(&self, new: &NewMessage) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_message(&mut tx, new).await?;
        tx.commit().await?;
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
            bail!(
                "message {} belongs to conversation {}, not {}",
                stray.message.id,
                stray.message.conversation_id,
                conversation.id
            );
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                created_at = excluded.created_at
            "#,
        )
        .bind(&conversation.id)
        .bind(&conversation.title)
        .bind(conversation.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        // Vectors go with their messages via ON DELETE CASCADE.
        sqlx::query("DELETE FROM messages_fts WHERE conversation_id = ?")
            .bind(&conversation.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(&conversation.id)
            .execute(&mut *tx)
            .await?;

        for new in messages {
            write_message(&mut tx, new).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_embedding(&self, message_id: &str, vector: &[f32], model: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_vector(&mut tx, message_id, vector, model).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn messages_missing_embeddings(&self, limit: Option<usize>) -> Result<Vec<Message>> {
        let limit_val = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.conversation_id, m.role, m.content, m.created_at
            FROM messages m
            LEFT JOIN message_vectors v ON v.message_id = m.id
            WHERE v.message_id IS NULL AND trim(m.content) != ''
            ORDER BY m.created_at, m.id
            LIMIT ?
            "#,
        )
        .bind(limit_val)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT id, title, created_at FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            Ok(Conversation {
                id: r.get("id"),
                title: r.get("title"),
                created_at: from_millis(r.get("created_at"))?,
            })
        })
        .transpose()
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query(
            "SELECT id, conversation_id, role, content, created_at FROM messages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(message_from_row).transpose()
    }

    async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, role, content, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at, id
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            r#"
            SELECT v.message_id, m.conversation_id, v.embedding
            FROM message_vectors v
            JOIN messages m ON m.id = v.message_id
            WHERE trim(m.content) != ''
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<Candidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                Candidate {
                    message_id: row.get("message_id"),
                    conversation_id: row.get("conversation_id"),
                    raw_score: cosine_similarity(query_vec, &vec) as f64,
                    source: ScoreSource::Vector,
                }
            })
            .collect();

        sort_candidates(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn lexical_search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        // Empty content has no tokens, so it can never match.
        let rows = sqlx::query(
            r#"
            SELECT message_id, conversation_id, rank
            FROM messages_fts
            WHERE messages_fts MATCH ?
            ORDER BY rank, message_id
            LIMIT ?
            "#,
        )
        .bind(&match_expr)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                Candidate {
                    message_id: row.get("message_id"),
                    conversation_id: row.get("conversation_id"),
                    raw_score: -rank,
                    source: ScoreSource::Lexical,
                }
            })
            .collect();

        Ok(candidates)
    }

    async fn counts(&self) -> Result<(i64, i64)> {
        let conversations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?;
        let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok((conversations, messages))
    }
}

/// Upsert one message, its FTS row, and its vector (or lack of one).
async fn write_message(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, new: &NewMessage) -> Result<()> {
    let msg = &new.message;

    sqlx::query(
        r#"
        INSERT INTO messages (id, conversation_id, role, content, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            conversation_id = excluded.conversation_id,
            role = excluded.role,
            content = excluded.content,
            created_at = excluded.created_at
        "#,
    )
    .bind(&msg.id)
    .bind(&msg.conversation_id)
    .bind(msg.role.as_str())
    .bind(&msg.content)
    .bind(msg.created_at.timestamp_millis())
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM messages_fts WHERE message_id = ?")
        .bind(&msg.id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("INSERT INTO messages_fts (message_id, conversation_id, content) VALUES (?, ?, ?)")
        .bind(&msg.id)
        .bind(&msg.conversation_id)
        .bind(&msg.content)
        .execute(&mut **tx)
        .await?;

    match &new.embedding {
        Some(vector) => upsert_vector(tx, &msg.id, vector, "imported").await?,
        None => {
            sqlx::query("DELETE FROM message_vectors WHERE message_id = ?")
                .bind(&msg.id)
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

async fn upsert_vector(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    message_id: &str,
    vector: &[f32],
    model: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO message_vectors (message_id, model, dims, embedding, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(message_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            embedding = excluded.embedding,
            created_at = excluded.created_at
        "#,
    )
    .bind(message_id)
    .bind(model)
    .bind(vector.len() as i64)
    .bind(vec_to_blob(vector))
    .bind(Utc::now().timestamp_millis())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(
            fts_query("rust OR \"ownership\"").as_deref(),
            Some("\"rust\" OR \"or\" OR \"ownership\"")
        );
        assert_eq!(fts_query("  ?!  "), None);
    }
}
