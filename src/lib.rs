//! parish-library: a library management server for church lending libraries.
//!
//! This crate provides a REST backend for a small lending library:
//! a book catalog organized into categories, user accounts, per-user
//! reading progress synchronization, highlights and notes, and an
//! append-only activity log with bulk archival.
//!
//! # Features
//!
//! - Book and category management with referential-integrity guards
//! - User accounts and bearer-token authentication
//! - Reading progress synchronization (upsert, last writer wins)
//! - Highlights and free-form notes keyed by CFI range
//! - Activity logging with filtered listing and archival
//! - Local file storage with cover thumbnails
//! - Embeddable reader-sync engine for client apps
//!
//! The `reader` module is the client side of the sync flow: a debounced
//! progress syncer and an annotation bridge that speak a small
//! tagged-union event protocol with an external rendering engine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and user management.
pub mod auth;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Client-side reader sync engine.
pub mod reader;
/// HTTP server.
pub mod server;
/// Local file storage for book files and covers.
pub mod storage;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
