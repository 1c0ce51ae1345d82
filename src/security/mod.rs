//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-IP limits, shared limiter type for sessions)
//!     → auth.rs (access token guard → Uid in the context)
//!         → token.rs (encrypt-then-MAC claim codec)
//!     → Pass to handlers
//! ```
//!
//! # Design Decisions
//! - Fail closed: a failed check replies immediately and stops the chain
//! - No trust in client input: tokens are authenticated before any claim is read

pub mod auth;
pub mod rate_limit;
pub mod token;

pub use auth::{AuthEngine, AuthError, AuthToken, Uid};
pub use rate_limit::{ip_rate_limit, sec_scopes, RateLimiter, Scope};
pub use token::{TokenCodec, TokenError};
