//! Token budget enforcement.
//!
//! Token counts are an approximation, not a tokenizer: each message costs
//! `ceil(chars / 4)` tokens of its content, and a window costs the sum over
//! its messages. Headers and markers added by the renderer are not counted.
//!
//! When a window is over budget, the message farthest from the match is
//! removed (the older one at equal distance) until the window fits or only
//! the match is left. A match that alone exceeds the budget is cut at a
//! character boundary and suffixed with [`TRUNCATION_MARKER`].

use tracing::debug;

use crate::error::RecallError;
use crate::models::Window;

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Appended to a matched message cut down to fit the budget.
pub const TRUNCATION_MARKER: &str = " [...truncated]";

/// `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

pub fn window_tokens(window: &Window) -> usize {
    window
        .messages
        .iter()
        .map(|m| estimate_tokens(&m.content))
        .sum()
}

/// Fit `window` into `max_tokens`. `0` means unlimited.
pub fn enforce_budget(mut window: Window, max_tokens: usize) -> Result<Window, RecallError> {
    if window.match_position >= window.len() {
        return Err(RecallError::invariant(format!(
            "match position {} outside window of {} messages",
            window.match_position,
            window.len()
        )));
    }
    if max_tokens == 0 {
        return Ok(window);
    }

    let before_tokens = window_tokens(&window);
    let mut tokens = before_tokens;

    while tokens > max_tokens && window.len() > 1 {
        let before = window.before_count();
        let after = window.after_count();
        let removed = if before > 0 && before >= after {
            window.match_position -= 1;
            window.start_index += 1;
            window.messages.remove(0)
        } else {
            window
                .messages
                .pop()
                .ok_or_else(|| RecallError::invariant("budget trimmed an empty window"))?
        };
        tokens -= estimate_tokens(&removed.content);
        window.trimmed = true;
    }

    if tokens > max_tokens {
        let matched = &mut window.messages[window.match_position];
        let keep = (max_tokens * CHARS_PER_TOKEN).saturating_sub(TRUNCATION_MARKER.chars().count());
        let cut: String = matched.content.chars().take(keep).collect();
        matched.content = format!("{}{}", cut, TRUNCATION_MARKER);
        window.trimmed = true;
    }

    if window.trimmed {
        let present: Vec<&str> = window.messages.iter().map(|m| m.id.as_str()).collect();
        let matched_ids = window
            .matched_ids
            .iter()
            .filter(|id| present.contains(&id.as_str()))
            .cloned()
            .collect();
        window.matched_ids = matched_ids;

        debug!(
            conversation_id = %window.conversation_id,
            before_tokens,
            after_tokens = window_tokens(&window),
            messages = window.len(),
            "trimmed window to token budget"
        );
    }

    Ok(window)
}
