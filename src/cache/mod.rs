//! Shared in-memory state.
//!
//! # Data Flow
//! ```text
//! Session engine:
//!     session id → CacheKey::Session → CacheEntry::Session (values + URL limiters)
//!     client ip  → CacheKey::ClientIp → CacheEntry::Limiter (cookie creation)
//!
//! ip_rate_limit middleware:
//!     client ip  → CacheKey::ClientIp → CacheEntry::Limiter
//! ```
//!
//! # Design Decisions
//! - One bounded LRU per engine, passed explicitly (no process-wide default)
//! - Entries are `Arc`s: a handle outlives its eviction until the request ends

pub mod lru;

use std::net::IpAddr;
use std::sync::Arc;

use crate::security::rate_limit::RateLimiter;
use crate::session::SessionData;

pub use self::lru::{CacheStats, Lru};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Session(String),
    ClientIp(IpAddr),
}

#[derive(Debug, Clone)]
pub enum CacheEntry {
    Session(Arc<SessionData>),
    Limiter(Arc<RateLimiter>),
}

impl CacheEntry {
    pub fn as_session(&self) -> Option<&Arc<SessionData>> {
        match self {
            Self::Session(data) => Some(data),
            Self::Limiter(_) => None,
        }
    }

    pub fn as_limiter(&self) -> Option<&Arc<RateLimiter>> {
        match self {
            Self::Limiter(limiter) => Some(limiter),
            Self::Session(_) => None,
        }
    }
}

/// The cache shared by the session engine and the per-IP limiter.
pub type SharedCache = Lru<CacheKey, CacheEntry>;
