//! # ArchMen Core
//!
//! Shared logic for the ArchMen knowledge service: data models,
//! sliding-window chunking, store traits, the assessment-session state
//! machine, and the embedding/chat provider traits.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Concrete providers and the SQLite store live in the `archmen` app crate.

pub mod chat;
pub mod chunk;
pub mod embedding;
pub mod models;
pub mod session;
pub mod store;
