//! # Chat Recall
//!
//! Hybrid contextual search over imported chat archives.
//!
//! The retrieval logic lives in [`chat_recall_core`]; this crate is the
//! application shell around it: configuration, the SQLite store, embedding
//! providers, import and backfill commands, and the HTTP service.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────────┐
//! │   import   │──▶│    SQLite    │◀──│ embed pending │
//! │   (JSONL)  │   │  FTS5 + Vec  │   │  (providers)  │
//! └────────────┘   └──────┬───────┘   └───────────────┘
//!                         │ MessageStore
//!                         ▼
//!                 ┌────────────────┐
//!                 │ RecallPipeline │
//!                 └───────┬────────┘
//!                ┌────────┴────────┐
//!                ▼                 ▼
//!           ┌─────────┐       ┌─────────┐
//!           │   CLI   │       │  HTTP   │
//!           │(recall) │       │ (axum)  │
//!           └─────────┘       └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! recall init                             # create database
//! recall import ./archive.jsonl           # load conversations
//! recall embed pending                    # generate embeddings
//! recall search "tomato watering" --context 2
//! recall serve                            # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `MessageStore` |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embed_cmd`] | Embedding backfill |
//! | [`import`] | JSONL import |
//! | [`search`] | CLI search and pipeline construction |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod import;
pub mod migrate;
pub mod search;
pub mod server;
pub mod sqlite_store;
