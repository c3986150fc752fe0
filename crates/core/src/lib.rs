//! # calsync Core
//!
//! Pure business logic of the sync engine - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces for the calendar store, credential store, and
//!   provider clients
//! - The token manager (cached access tokens, coalesced refresh)
//! - The reconciler (remote/local diff with conflict detection)
//! - The sync orchestrator (per-calendar state machine and fan-out)
//!
//! ## Architecture Principles
//! - Only depends on `calsync-common` and `calsync-domain`
//! - No database or HTTP code; all I/O goes through traits
//! - Pure, testable business logic

pub mod orchestrator;
pub mod ports;
pub mod reconcile;
pub mod resilience;
pub mod token;

pub use orchestrator::SyncService;
pub use ports::{CalendarStore, CredentialStore, ProviderClient, ProviderRegistry};
pub use reconcile::{reconcile, ReconcilerConfig};
pub use token::TokenManager;
