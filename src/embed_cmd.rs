//! Embedding backfill (`recall embed pending`).
//!
//! Finds messages without a stored vector, embeds them in batches with the
//! configured provider, and stores the results. A failed batch is logged
//! and counted, and the backfill moves on; re-running picks up whatever is
//! still missing.

use anyhow::{bail, Result};
use tracing::{info, warn};

use chat_recall_core::models::Message;
use chat_recall_core::store::MessageStore;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::sqlite_store::SqliteStore;

/// Outcome of one backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedReport {
    pub total: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// CLI entry point.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let pending = store.messages_missing_embeddings(limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  messages needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all messages up to date");
        pool.close().await;
        return Ok(());
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);
    let report = embed_messages(&store, provider.as_ref(), &pending, batch_size).await?;

    println!("embed pending");
    println!("  total pending: {}", report.total);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);

    pool.close().await;
    Ok(())
}

/// Embed `pending` in batches of `batch_size` and store the vectors.
///
/// Provider failures and malformed responses fail only their batch; a
/// store write failure aborts the run.
pub async fn embed_messages(
    store: &dyn MessageStore,
    provider: &dyn EmbeddingProvider,
    pending: &[Message],
    batch_size: usize,
) -> Result<EmbedReport> {
    let mut report = EmbedReport {
        total: pending.len(),
        ..Default::default()
    };
    let expected_dims = provider.dims();

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|m| m.content.clone()).collect();

        let vectors = match provider.embed_batch(&texts).await {
            Ok(v) if v.len() == batch.len() => v,
            Ok(v) => {
                warn!(
                    expected = batch.len(),
                    got = v.len(),
                    "embedding batch returned the wrong number of vectors"
                );
                report.failed += batch.len();
                continue;
            }
            Err(e) => {
                warn!(error = %e, size = batch.len(), "embedding batch failed");
                report.failed += batch.len();
                continue;
            }
        };

        for (message, vector) in batch.iter().zip(vectors.iter()) {
            if expected_dims > 0 && vector.len() != expected_dims {
                warn!(
                    message_id = %message.id,
                    expected_dims,
                    got = vector.len(),
                    "skipping embedding with unexpected dimensionality"
                );
                report.failed += 1;
                continue;
            }
            store
                .upsert_embedding(&message.id, vector, provider.model_name())
                .await?;
            report.embedded += 1;
        }
    }

    info!(
        total = report.total,
        embedded = report.embedded,
        failed = report.failed,
        "embedding backfill finished"
    );
    Ok(report)
}
