//! JSONL archive import (`recall import <file>`).
//!
//! Each non-empty line is one already-parsed conversation:
//!
//! ```json
//! {"id": "c1", "title": "Tomatoes", "messages": [
//!   {"id": "m1", "role": "user", "content": "...", "created_at": "2024-05-01T10:00:00Z"}
//! ]}
//! ```
//!
//! `id` fields are optional and default to fresh UUIDs. A message may carry
//! a precomputed `embedding`, which is stored as-is. Each line is written
//! atomically: re-importing a conversation id replaces its whole message
//! set, and messages missing from the new line are removed.

use std::io::BufRead;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use chat_recall_core::models::{Conversation, Message, NewMessage, Role};
use chat_recall_core::store::MessageStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Deserialize)]
struct ImportConversation {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    messages: Vec<ImportMessage>,
}

#[derive(Debug, Deserialize)]
struct ImportMessage {
    #[serde(default)]
    id: Option<String>,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub conversations: usize,
    pub messages: usize,
    pub embeddings: usize,
}

/// CLI entry point.
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open import file: {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let report = import_jsonl(&store, reader).await?;

    println!("import {}", path.display());
    println!("  conversations: {}", report.conversations);
    println!("  messages: {}", report.messages);
    println!("  with embeddings: {}", report.embeddings);

    pool.close().await;
    Ok(())
}

/// Import every conversation in `reader` into `store`.
///
/// A malformed line aborts the import with its line number; conversations
/// before it stay imported.
pub async fn import_jsonl<R: BufRead>(store: &dyn MessageStore, reader: R) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("Failed to read line {}", line_no))?;
        if line.trim().is_empty() {
            continue;
        }

        let parsed: ImportConversation = serde_json::from_str(&line)
            .with_context(|| format!("Invalid conversation on line {}", line_no))?;
        let (conversation, messages) =
            into_records(parsed).with_context(|| format!("Invalid conversation on line {}", line_no))?;

        store
            .replace_conversation(&conversation, &messages)
            .await
            .with_context(|| format!("Failed to store conversation on line {}", line_no))?;

        report.conversations += 1;
        report.embeddings += messages.iter().filter(|m| m.embedding.is_some()).count();
        report.messages += messages.len();
    }

    info!(
        conversations = report.conversations,
        messages = report.messages,
        "import finished"
    );
    Ok(report)
}

fn into_records(parsed: ImportConversation) -> Result<(Conversation, Vec<NewMessage>)> {
    let conversation_id = parsed.id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut messages = Vec::with_capacity(parsed.messages.len());
    for m in parsed.messages {
        let role: Role = m.role.parse()?;
        if let Some(vector) = &m.embedding {
            if vector.is_empty() {
                bail!("message embedding must not be empty");
            }
        }
        messages.push(NewMessage {
            message: Message {
                id: m.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                conversation_id: conversation_id.clone(),
                role,
                content: m.content,
                created_at: m.created_at,
            },
            embedding: m.embedding,
        });
    }

    let created_at = parsed
        .created_at
        .or_else(|| messages.iter().map(|m| m.message.created_at).min())
        .unwrap_or_else(Utc::now);

    let conversation = Conversation {
        id: conversation_id,
        title: parsed.title,
        created_at,
    };
    Ok((conversation, messages))
}
