//! # calsync Infrastructure
//!
//! Infrastructure implementations of the core engine ports.
//!
//! This crate contains:
//! - SQLite implementations of the calendar and credential stores
//! - reqwest-based provider clients (Google-style, Outlook-style)
//! - Configuration loading (environment first, TOML file fallback)
//!
//! ## Architecture
//! - Implements traits defined in `calsync-core`
//! - Depends on `calsync-domain` and `calsync-core`
//! - Contains all "impure" code (database, HTTP)

pub mod config;
pub mod database;
pub mod errors;
pub mod providers;

// Re-export commonly used items
pub use database::{SqliteCalendarStore, SqliteCredentialStore, SqlitePool};
pub use errors::InfraError;
pub use providers::{build_http_client, build_registry, create_provider};
