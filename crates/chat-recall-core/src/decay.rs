//! Window score adjustments applied after expansion and before dedup.
//!
//! - **Proximity decay**: `aggregated = base × mean(exp(-λ·|i - match|))`
//!   over every message of the window. The matched message weighs `1.0`, so
//!   a single-message window or `λ = 0` keeps the base score. Wide windows
//!   around a match score slightly below narrow ones.
//! - **Recency bonus** (off by default):
//!   `aggregated += weight × 0.5^(age_days / half_life_days)`, using the
//!   matched message's timestamp, clamped to `1.0`.
//!
//! Both are total over well-formed windows. The request clock is passed in
//! so results stay reproducible.

use chrono::{DateTime, Utc};

use crate::models::Window;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Mean proximity weight of the window's messages relative to the match.
pub fn proximity_factor(window_len: usize, match_position: usize, lambda: f64) -> f64 {
    if window_len <= 1 || lambda <= 0.0 {
        return 1.0;
    }
    let total: f64 = (0..window_len)
        .map(|i| {
            let distance = i.abs_diff(match_position) as f64;
            (-lambda * distance).exp()
        })
        .sum();
    total / window_len as f64
}

/// Rescale `aggregated_score` by the window's proximity factor.
pub fn apply_proximity_decay(mut window: Window, lambda: f64) -> Window {
    let factor = proximity_factor(window.len(), window.match_position, lambda);
    window.aggregated_score = window.base_score * factor;
    window
}

/// Half-life weight for a message created at `created_at`, seen at `now`.
/// Messages from the future count as brand new.
pub fn recency_factor(created_at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let age_days = ((now - created_at).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0);
    0.5_f64.powf(age_days / half_life_days)
}

/// Add the recency bonus of the matched message, clamped to `1.0`.
pub fn apply_recency_bonus(
    mut window: Window,
    now: DateTime<Utc>,
    half_life_days: f64,
    weight: f64,
) -> Window {
    if let Some(matched) = window.matched_message() {
        let bonus = weight * recency_factor(matched.created_at, now, half_life_days);
        window.aggregated_score = (window.aggregated_score + bonus).min(1.0);
    }
    window
}
