//! The gatehouse user-account backend.
//!
//! Serves the binary RPC described in `gatehouse-wire` over TCP: login,
//! user-info fetch and edit, token authentication, and health checks. The
//! transport machinery lives in `gatehouse-session`; this crate supplies
//! the handlers, the persistent user store, and configuration.

pub mod config;
pub mod handlers;
pub mod store;

pub use config::{BackendConfig, ConfigError};
pub use handlers::build_dispatcher;
pub use store::{MemoryStore, PgUserStore, StoreError, UserPatch, UserRecord, UserStore};
