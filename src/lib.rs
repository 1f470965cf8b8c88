//! # kbvault
//!
//! **A versioned knowledge-base vault over a vector store, exposed as
//! MCP tools.**
//!
//! kbvault stores text and source-code documents together with their
//! dense embeddings and a canonical metadata envelope, and exposes a
//! tool-oriented request/response interface through which agents add,
//! search, update, verify, back up, and restore documents. The engine of
//! the crate is the ingestion core: deterministic duplicate detection,
//! versioned deprecation-linked histories, and chunked incremental
//! updates that re-embed only what changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────────────┐   ┌───────────┐
//! │ MCP stdio  │──▶│  ingestion controller         │──▶│  vector   │
//! │ (tools)    │   │  hash → envelope → classify   │   │  store    │
//! └────────────┘   │  → deprecate → embed → write  │   │ (qdrant)  │
//!       │          └──────────────────────────────┘   └─────┬─────┘
//!       │                                                   │
//!       └──────────── query / verify / bulk ◀───────────────┘
//! ```
//!
//! ## Write Pipeline
//!
//! 1. The **metadata builder** ([`metadata`]) turns caller fragments
//!    into a validated [`models::Envelope`].
//! 2. The **hasher** ([`hash`]) fingerprints normalized content and the
//!    envelope minus its volatile fields.
//! 3. The **duplicate classifier** ([`dedup`]) compares the write
//!    against existing records sharing its `doc_id` and picks one of
//!    four actions: skip, update, warn, store.
//! 4. On update, the **versioning engine** ([`versioning`]) deprecates
//!    the prior version by content-hash filter before the replacement
//!    is written.
//! 5. For chunked documents, the **chunker** ([`chunker`]) and the
//!    **diff engine** ([`chunk_update`]) limit embedding to the chunks
//!    whose content actually changed.
//! 6. The **ingestion controller** ([`ingest`]) orchestrates the above
//!    and is the only component that calls the embedder or writes.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment-based configuration |
//! | [`error`] | Error taxonomy surfaced in every tool response |
//! | [`models`] | Envelope, record sum type, category/status enums |
//! | [`hash`] | Content normalization and SHA-256 fingerprints |
//! | [`metadata`] | Envelope builders for documents and chunks |
//! | [`chunker`] | Recursive boundary-aware text chunker |
//! | [`filter`] | Filter predicate grammar and evaluation |
//! | [`dedup`] | Four-level duplicate classifier |
//! | [`versioning`] | Filter-based deprecation engine |
//! | [`chunk_update`] | Chunk diff engine |
//! | [`ingest`] | Ingestion controller and file/directory ingestion |
//! | [`embedding`] | Embedding providers (OpenAI-compatible, hashing) |
//! | [`store`] | Vector store trait, in-memory and Qdrant backends |
//! | [`query`] | Search, path lookup, stats, version history |
//! | [`verify`] | Quality checks and storage audit |
//! | [`bulk`] | Bulk mutation, export/import |
//! | [`backup`] | Checksummed backup and restore |
//! | [`tools`] | Tool trait, registry, and all tool implementations |
//! | [`server`] | MCP stdio server |
//! | [`context`] | Shared service context |

pub mod backup;
pub mod bulk;
pub mod chunk_update;
pub mod chunker;
pub mod config;
pub mod context;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod hash;
pub mod ingest;
pub mod metadata;
pub mod models;
pub mod query;
pub mod server;
pub mod store;
pub mod tools;
pub mod verify;
pub mod versioning;
