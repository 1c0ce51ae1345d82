//! Per-client sessions.
//!
//! # Responsibilities
//! - Give every request a [`Session`] handle, loaded or freshly minted
//! - Persist changed sessions right before the response head goes out
//! - Throttle cookie creation per client IP and calls per URL prefix per session
//!
//! # Data Flow
//! ```text
//! Request
//!     → engine.rs: cookie id → LRU → Store → new session (IP limited)
//!     → URL rate policy (limiters kept inside the session)
//!     → handlers use the Session from the context registry
//!     → pre-write hook: Set-Cookie + Store::save when modified
//! ```
//!
//! # Design Decisions
//! - The LRU entry and the request hold the same `Arc<SessionData>`; the
//!   handle never outlives its request
//! - Concurrent requests of one session share values; last writer wins
//! - An emptied session clears its cookie and store entry but stays cached,
//!   so its id cannot be reused by a client

pub mod cookie;
pub mod cookie_store;
pub mod engine;
pub mod memory_store;
pub mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::http::{Context, FromContext, Rejection};
use crate::security::rate_limit::{RateLimiter, Scope};

pub use self::cookie::Cookie;
pub use self::cookie_store::CookieStore;
pub use self::engine::{SessionEngine, UrlRatePolicy};
pub use self::memory_store::MemoryStore;
pub use self::store::{NoStore, Store, StoreError};

/// Session values.
pub type Values = Map<String, Value>;

/// Key prefix of per-URL limiters kept in a session.
pub const RATE_LIMIT_KEY_PREFIX: &str = "rl:";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session: too much call")]
    Overrun,

    #[error("session: remote ip is invalid")]
    Ip,

    #[error("session: ratelimit configuration not found for {0}")]
    PolicyMissing(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Overrun => StatusCode::TOO_MANY_REQUESTS,
            // Same answer as `ip_rate_limit` for an unknown client.
            Self::Ip => StatusCode::BAD_REQUEST,
            Self::PolicyMissing(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Shared state of one session.
#[derive(Default)]
pub struct SessionData {
    values: Mutex<Values>,
    modified: AtomicBool,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl std::fmt::Debug for SessionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionData")
            .field("values", &self.values.lock().len())
            .field("modified", &self.is_modified())
            .field("limiters", &self.limiters.lock().len())
            .finish()
    }
}

impl SessionData {
    pub fn new(values: Values) -> Self {
        Self {
            values: Mutex::new(values),
            ..Self::default()
        }
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    fn touch(&self) {
        self.modified.store(true, Ordering::Release);
    }

    /// Copy of the values if they changed since the last call.
    pub(crate) fn take_modified(&self) -> Option<Values> {
        let values = self.values.lock();
        self.modified
            .swap(false, Ordering::AcqRel)
            .then(|| values.clone())
    }

    /// The limiter stored under `key`, created for `scopes` when absent or
    /// configured differently.
    pub(crate) fn limiter(&self, key: &str, scopes: &[Scope]) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock();
        let slot = format!("{RATE_LIMIT_KEY_PREFIX}{key}");
        if let Some(limiter) = limiters.get(&slot).filter(|l| l.same_scopes(scopes)) {
            return limiter.clone();
        }
        let limiter = Arc::new(RateLimiter::new(scopes.to_vec()));
        limiters.insert(slot, limiter.clone());
        // The client needs its cookie back to be counted again.
        self.touch();
        limiter
    }
}

/// Handle to the current request's session.
///
/// Handlers get it with `Dep`-style injection (`session: Session`) or
/// `ctx.get::<Session>()`.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    data: Arc<SessionData>,
}

impl Session {
    pub fn new(id: impl Into<String>, data: Arc<SessionData>) -> Self {
        Self { id: id.into(), data }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &Arc<SessionData> {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.values.lock().get(key).cloned()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.data
            .values
            .lock()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Decode the value under `key` into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.values.lock().insert(key.into(), value.into());
        self.data.touch();
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.data.values.lock().remove(key);
        if removed.is_some() {
            self.data.touch();
        }
        removed
    }

    /// Drop every value; the next save deletes the session.
    pub fn clear(&self) {
        self.data.values.lock().clear();
        self.data.touch();
    }

    /// Snapshot of all values.
    pub fn values(&self) -> Values {
        self.data.values.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.data.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_modified(&self) -> bool {
        self.data.is_modified()
    }
}

impl FromContext for Session {
    fn from_context<'a>(ctx: &'a mut Context) -> BoxFuture<'a, Result<Self, Rejection>> {
        let session = ctx.get::<Session>().cloned().map_err(Rejection::from);
        Box::pin(async move { session })
    }
}
