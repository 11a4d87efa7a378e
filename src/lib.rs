//! # PDF RAG
//!
//! Retrieval-augmented question answering over PDF documents, with
//! per-session isolation.
//!
//! PDFs are split into one chunk per non-blank page, embedded, and stored
//! in a persistent SQLite collection. Re-uploading a document with the same
//! content is detected by its whole-document hash and skipped. Questions are
//! answered from the global collection, or from a single session's uploads
//! only, by retrieving the top-k most similar pages and handing them to a
//! text-generation model together with the question.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────────┐
//! │  Loader  │──▶│ Embedder │──▶│  SqliteIndex  │  global, persistent
//! │ PDF→page │   └──────────┘   └───────┬───────┘
//! └──────────┘                          │
//!      ▲                                ▼
//! ┌────┴──────────┐   ┌───────────────────────┐   ┌───────────┐
//! │ session folder│──▶│ InMemoryIndex (per q) │──▶│ Generator │
//! └───────────────┘   └───────────────────────┘   └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`hash`] | SHA-256 content and file digests |
//! | [`loader`] | PDF → page chunks |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Text-generation provider abstraction |
//! | [`store`] | Vector index trait and backends |
//! | [`session`] | Session storage and index-scope resolution |
//! | [`pipeline`] | Retrieval-and-answer pipeline and ingestion |
//! | [`history`] | Chat transcript persistence |
//! | [`cleanup`] | Session removal and unused-session cleanup |
//! | [`server`] | HTTP server |

pub mod cleanup;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod hash;
pub mod history;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod store;
