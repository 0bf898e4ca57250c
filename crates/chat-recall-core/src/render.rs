//! Window rendering.
//!
//! Each message renders as a `[role] <RFC3339 timestamp>` header line followed
//! by its content; messages are separated by a blank line. With markers on,
//! the window is wrapped in [`CTX_START`]/[`CTX_END`] lines and the matched
//! message in [`MATCH_START`]/[`MATCH_END`] lines. The marker literals are
//! part of the response contract.

use chrono::SecondsFormat;

use crate::models::{Message, Window};

pub const CTX_START: &str = "CTX_START";
pub const CTX_END: &str = "CTX_END";
pub const MATCH_START: &str = "MATCH_START";
pub const MATCH_END: &str = "MATCH_END";

/// Render `window` in message order. Pure: same window and flag, same bytes.
pub fn render(window: &Window, include_markers: bool) -> String {
    let mut blocks: Vec<String> = Vec::with_capacity(window.len());

    for (i, message) in window.messages.iter().enumerate() {
        let body = render_message(message);
        if include_markers && i == window.match_position {
            blocks.push(format!("{}\n{}\n{}", MATCH_START, body, MATCH_END));
        } else {
            blocks.push(body);
        }
    }

    let joined = blocks.join("\n\n");
    if include_markers {
        format!("{}\n{}\n{}", CTX_START, joined, CTX_END)
    } else {
        joined
    }
}

fn render_message(message: &Message) -> String {
    format!(
        "[{}] {}\n{}",
        message.role,
        message.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        message.content
    )
}
