//! # Ragmill
//!
//! A background ingestion worker that turns project content sources
//! (uploaded files, URLs, raw text) into vector embeddings for
//! retrieval-augmented generation.
//!
//! The worker polls a SQLite-backed job queue, claims one source at a
//! time (deletion jobs strictly prioritized), runs each of its documents
//! through the matching pipeline, and releases the job with a
//! version-checked status update.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────┐   ┌──────────┐
//! │  SQLite  │──▶│   Job Poller      │──▶│  Qdrant  │
//! │ sources/ │   │ files|urls|text   │   │  points  │
//! │   docs   │◀──│ chunk+embed+store │   └──────────┘
//! └──────────┘   └────────┬──────────┘
//!                         │
//!                    ┌────┴────┐
//!                    │ Billing │
//!                    └─────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Source/document storage traits and backends |
//! | [`chunk`] | Recursive text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`extract`] | LLM file-content extraction |
//! | [`scrape`] | URL scraping |
//! | [`files`] | Uploaded-file retrieval (local, S3) |
//! | [`vector`] | Vector-store access |
//! | [`billing`] | Credit authorization and usage reporting |
//! | [`retry`] | Bounded-retry combinator |
//! | [`ingest`] | Per-document pipelines |
//! | [`worker`] | The scheduler loop |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod billing;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod files;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod retry;
pub mod scrape;
pub mod store;
pub mod vector;
pub mod worker;
