//! # Chat Recall Core
//!
//! Hybrid contextual retrieval over imported conversations: data models,
//! store and embedder abstractions, score normalization, hybrid ranking,
//! window expansion, deduplication, token budgeting and rendering.
//!
//! This crate contains no sqlx, HTTP, or filesystem I/O. Tokio is used only
//! for per-query deadlines and joining the two sub-queries.
//!
//! ```text
//! Candidate Retriever ─▶ Hybrid Ranker ─▶ Window Expander ─▶ Deduplicator
//!                                              ─▶ Budget Enforcer ─▶ Renderer
//! ```
//!
//! Most callers only need [`RecallPipeline`](pipeline::RecallPipeline) and
//! the [`api`] types.

pub mod api;
pub mod budget;
pub mod config;
pub mod decay;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod ranker;
pub mod render;
pub mod retriever;
pub mod store;
pub mod window;

pub use error::RecallError;
pub use pipeline::RecallPipeline;
