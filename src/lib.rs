//! # ArchMen
//!
//! A retrieval-augmented knowledge service for archetype discovery.
//!
//! Administrators upload text describing assessments and archetypes; the
//! service chunks it, embeds each chunk, and stores the vectors in SQLite.
//! A chat endpoint answers users with context retrieved from the relevant
//! assessment or archetype, and assessment sessions track each user's
//! progress until their archetypes are discovered.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Upload     │──▶│  Pipeline     │──▶│  SQLite   │
//! │ text/file   │   │ Chunk+Embed  │   │ chunks+vec│
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │ similarity
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                 ┌──────────┐        ┌──────────┐
//!                 │   CLI    │        │   HTTP    │
//!                 │(archmen) │        │ chat etc. │
//!                 └──────────┘        └──────────┘
//! ```
//!
//! Pure logic (chunking, similarity ranking, prompt assembly, the session
//! state machine, and the storage traits) lives in the `archmen-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`embedding`] | Embedding providers |
//! | [`pipeline`] | Chunk, embed, and store a document |
//! | [`chat`] | Chat providers and the chat orchestrator |
//! | [`auth`] | Bearer-token authentication |
//! | [`billing`] | Checkout sessions and payment webhooks |
//! | [`media`] | Avatar and video capabilities |
//! | [`error`] | HTTP error responses |
//! | [`server`] | HTTP server |

pub mod auth;
pub mod billing;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod media;
pub mod migrate;
pub mod pipeline;
pub mod server;
pub mod sqlite_store;
