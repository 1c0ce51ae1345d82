//! API server framework: radix-tree routing, handler chains with dependency
//! injection, sessions, token authentication and rate limiting.

pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod security;
pub mod session;

pub use config::schema::AppConfig;
pub use http::{adapt, handler, ApiService, Context, Handler, Server};
pub use lifecycle::Shutdown;
