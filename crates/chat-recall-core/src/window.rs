//! Window expansion.
//!
//! Turns a ranked match into a [`Window`]: a contiguous slice of the owning
//! conversation around the matched message.
//!
//! The base window is `[match - before, match + after]` clamped to the
//! conversation. A short conversation yields a short window; clamping is
//! never an error.
//!
//! With adaptive boundaries the window is then grown to whole turns. A turn
//! opens with a `user` message and runs until the next `user` message:
//!
//! - backward: while the first message is not `user`, prepend its predecessor;
//! - forward: while the message after the window is not `user`, append it.
//!
//! Growth stops once the window holds `max_window_size` messages, which
//! bounds the walk on conversations that never switch roles.

use crate::error::RecallError;
use crate::models::{Message, RankedMatch, Role, Window};

/// Boundary settings for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandOptions {
    pub before: usize,
    pub after: usize,
    pub adaptive: bool,
    pub max_window_size: usize,
}

/// The role that opens a conversational turn.
const TURN_OPENER: Role = Role::User;

/// Build the window for `candidate` over its conversation.
///
/// `conversation_messages` must be the full conversation in
/// `(created_at, id)` order. A candidate whose message is absent from it is
/// an invariant break, not a clamp case.
pub fn expand(
    candidate: &RankedMatch,
    conversation_messages: &[Message],
    options: &ExpandOptions,
) -> Result<Window, RecallError> {
    let match_index = conversation_messages
        .iter()
        .position(|m| m.id == candidate.message_id)
        .ok_or_else(|| {
            RecallError::invariant(format!(
                "message {} not found in conversation {}",
                candidate.message_id, candidate.conversation_id
            ))
        })?;

    if conversation_messages[match_index].conversation_id != candidate.conversation_id {
        return Err(RecallError::invariant(format!(
            "message {} belongs to conversation {}, candidate says {}",
            candidate.message_id,
            conversation_messages[match_index].conversation_id,
            candidate.conversation_id
        )));
    }

    let last = conversation_messages.len() - 1;
    let mut start = match_index.saturating_sub(options.before);
    let mut end = match_index.saturating_add(options.after).min(last);

    if options.adaptive {
        let cap = options.max_window_size.max(1);
        (start, end) = adapt_to_turns(conversation_messages, start, end, cap);
    }

    Ok(Window {
        conversation_id: candidate.conversation_id.clone(),
        messages: conversation_messages[start..=end].to_vec(),
        start_index: start,
        match_position: match_index - start,
        base_score: candidate.combined_score,
        aggregated_score: candidate.combined_score,
        vector_score: candidate.vector_score,
        lexical_score: candidate.lexical_score,
        matched_ids: vec![candidate.message_id.clone()],
        trimmed: false,
    })
}

/// Grow `[start, end]` outward to turn boundaries, never past `cap`
/// messages. Growth only ever adds messages, so the base window is kept
/// even when it already exceeds the cap.
fn adapt_to_turns(
    messages: &[Message],
    mut start: usize,
    mut end: usize,
    cap: usize,
) -> (usize, usize) {
    let size = |s: usize, e: usize| e - s + 1;

    while start > 0 && messages[start].role != TURN_OPENER && size(start, end) < cap {
        start -= 1;
    }

    while end + 1 < messages.len()
        && messages[end + 1].role != TURN_OPENER
        && size(start, end) < cap
    {
        end += 1;
    }

    (start, end)
}
