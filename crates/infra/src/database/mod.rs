//! SQLite-backed implementations of the engine's store ports.

pub mod calendar_store;
pub mod credential_store;
pub mod manager;

pub use calendar_store::SqliteCalendarStore;
pub use credential_store::SqliteCredentialStore;
pub use manager::SqlitePool;
