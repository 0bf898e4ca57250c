//! Window deduplication.
//!
//! Windows from the same conversation whose spans share at least one
//! message index are merged into one window covering `[min start, max end]`.
//! The merge is the classic interval sweep: sort a conversation's spans by
//! start, then fold each span into the current run while it overlaps.
//!
//! A merged window keeps the best credit among its constituents:
//!
//! - `aggregated_score` is the maximum constituent `aggregated_score`;
//! - `match_position`, `base_score` and the explain scores come from the
//!   constituent with the highest `base_score`, ties going to the earliest
//!   match in the conversation;
//! - `matched_ids` is the union of the constituents' matches.
//!
//! Output is ordered by `aggregated_score` descending, then
//! `conversation_id`, then `start_index`.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::error::RecallError;
use crate::models::{Message, Window};

/// Merge overlapping same-conversation windows and order the result.
pub fn deduplicate(windows: Vec<Window>) -> Result<Vec<Window>, RecallError> {
    let input = windows.len();

    let mut by_conversation: BTreeMap<String, Vec<Window>> = BTreeMap::new();
    for window in windows {
        check_window(&window)?;
        by_conversation
            .entry(window.conversation_id.clone())
            .or_default()
            .push(window);
    }

    let mut merged = Vec::with_capacity(input);
    for (_, mut group) in by_conversation {
        group.sort_by_key(|w| (w.span().start, w.span().end));

        let mut run: Vec<Window> = Vec::new();
        let mut run_end = 0usize;
        for window in group {
            let span = window.span();
            if !run.is_empty() && span.start > run_end {
                merged.push(merge_run(std::mem::take(&mut run))?);
            }
            run_end = if run.is_empty() {
                span.end
            } else {
                run_end.max(span.end)
            };
            run.push(window);
        }
        if !run.is_empty() {
            merged.push(merge_run(run)?);
        }
    }

    sort_windows(&mut merged);
    debug!(input, output = merged.len(), "deduplicated windows");
    Ok(merged)
}

/// `aggregated_score` descending, then `conversation_id`, then `start_index`.
pub fn sort_windows(windows: &mut [Window]) {
    windows.sort_by(|a, b| {
        b.aggregated_score
            .partial_cmp(&a.aggregated_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
            .then_with(|| a.start_index.cmp(&b.start_index))
    });
}

fn check_window(window: &Window) -> Result<(), RecallError> {
    if window.is_empty() {
        return Err(RecallError::invariant(format!(
            "empty window in conversation {}",
            window.conversation_id
        )));
    }
    if window.match_position >= window.len() {
        return Err(RecallError::invariant(format!(
            "match position {} outside window of {} messages",
            window.match_position,
            window.len()
        )));
    }
    Ok(())
}

/// Fold a run of mutually overlapping windows into one.
fn merge_run(mut run: Vec<Window>) -> Result<Window, RecallError> {
    if run.len() == 1 {
        return run.pop().ok_or_else(|| RecallError::invariant("empty merge run"));
    }

    let start = run.iter().map(|w| w.span().start).min().unwrap_or(0);
    let end = run.iter().map(|w| w.span().end).max().unwrap_or(0);

    let mut slots: Vec<Option<&Message>> = vec![None; end - start + 1];
    for window in &run {
        for (offset, message) in window.messages.iter().enumerate() {
            let idx = window.start_index + offset - start;
            match slots[idx] {
                Some(existing) if existing.id != message.id => {
                    return Err(RecallError::invariant(format!(
                        "windows disagree at index {} of conversation {}: {} vs {}",
                        window.start_index + offset,
                        window.conversation_id,
                        existing.id,
                        message.id
                    )));
                }
                Some(_) => {}
                None => slots[idx] = Some(message),
            }
        }
    }
    let messages = slots
        .into_iter()
        .enumerate()
        .map(|(i, m)| {
            m.cloned().ok_or_else(|| {
                RecallError::invariant(format!("gap at index {} in merged window", start + i))
            })
        })
        .collect::<Result<Vec<Message>, RecallError>>()?;

    let best = run
        .iter()
        .max_by(|a, b| {
            a.base_score
                .partial_cmp(&b.base_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                // max_by keeps the last maximum; reversing the index makes
                // the earliest match win ties
                .then_with(|| b.match_index().cmp(&a.match_index()))
        })
        .ok_or_else(|| RecallError::invariant("empty merge run"))?;

    let aggregated_score = run
        .iter()
        .map(|w| w.aggregated_score)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut seen = HashSet::new();
    let matched_ids: Vec<String> = run
        .iter()
        .flat_map(|w| w.matched_ids.iter())
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect();

    Ok(Window {
        conversation_id: best.conversation_id.clone(),
        messages,
        start_index: start,
        match_position: best.match_index() - start,
        base_score: best.base_score,
        aggregated_score,
        vector_score: best.vector_score,
        lexical_score: best.lexical_score,
        matched_ids,
        trimmed: run.iter().any(|w| w.trimmed),
    })
}
