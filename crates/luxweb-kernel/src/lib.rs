//! `luxweb-kernel` — shared contracts for the LuxWeb runtime.
//!
//! This crate carries the framework-agnostic types the other LuxWeb crates
//! build on:
//!
//! | Contract | Module |
//! |----------|--------|
//! | YAML-backed configuration tree | [`config`] |
//! | Request/response model and handler signatures | [`web`] |
//! | SQL collaborator interface | [`sql`] |
//! | Session collaborator interface | [`session`] |
//! | Delay / UID utilities | [`utils`] |
//!
//! Nothing in here touches axum, Socket.IO, or the filesystem watcher — those
//! live in `luxweb-server` and `luxweb-plugins`, which depend on this crate.

pub mod config;
pub mod session;
pub mod sql;
pub mod utils;
pub mod web;

pub use config::{ConfigError, ConfigSection, ConfigTree};
pub use session::{MemorySessionStore, Session, SessionError, SessionStore, SESSION_COOKIE};
pub use sql::{NullQueryExecutor, QueryError, QueryExecutor};
pub use web::{
    ApiHandler, ApiRequest, ApiResponse, HandlerError, HttpMethod, MiddlewareAction,
    RequestMiddleware, SocketHandler,
};
