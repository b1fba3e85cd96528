//! HTTP frontend for the gatehouse account service.
//!
//! Talks to the backend over the pooled binary RPC and keeps a read-through
//! cache of user projections in an external key-value store. The HTTP layer
//! is a thin axum surface over [`service::Portal`], which holds all the
//! cache-versus-backend logic and is tested without HTTP.

pub mod cache;
pub mod config;
pub mod routes;
pub mod service;

pub use cache::{CacheError, CachedUser, MemoryCache, RedisUserCache, UserCache};
pub use config::{ConfigError, WebConfig};
pub use routes::{router, AppState};
pub use service::{Portal, PortalError};
