//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files, and
//! every section has defaults so a minimal file is enough.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::http::context::DEFAULT_MAX_BODY_BYTES;
use crate::security::auth::{ACCESS_TOKEN_HEADER, DEFAULT_ACCESS_MAX_AGE, REFRESH_TOKEN_HEADER};
use crate::session::cookie::Cookie;
use crate::session::cookie_store::DEFAULT_TOKEN_COOKIE;

/// Root configuration of an API server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Routing behaviour.
    pub router: RouterConfig,

    /// Sessions, their store and rate limits.
    pub session: SessionConfig,

    /// Token authentication.
    pub auth: AuthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Redirect `/a/` to `/a` (and back) when only the other one exists.
    pub redirect_trailing_slash: bool,

    /// Redirect to the cleaned, case-corrected path when one exists.
    pub redirect_fixed_path: bool,

    /// Answer 405 when the path exists under another method.
    pub handle_method_not_allowed: bool,

    /// Largest request body read for binding.
    pub max_body_bytes: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            redirect_trailing_slash: true,
            redirect_fixed_path: false,
            handle_method_not_allowed: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Where session values are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Only in the LRU cache.
    None,
    /// In a sealed second cookie.
    #[default]
    Cookie,
    /// In process memory with a TTL.
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub enabled: bool,

    /// Attributes of the session id cookie.
    pub cookie: Cookie,

    /// Entries in the shared LRU (sessions and per-IP limiters); 0 is unbounded.
    pub lru_capacity: usize,

    /// `[count, seconds, ...]` new sessions allowed per client IP.
    pub cookie_rate: Vec<i64>,

    /// `"METHOD:/prefix"` or `"ANY:/prefix"` → `[count, seconds, ...]`.
    pub url_rate: BTreeMap<String, Vec<i64>>,

    pub store: StoreKind,

    /// Value key holding the session id; the store's default when unset.
    pub id_key: Option<String>,

    /// Cookie store: name of the values cookie.
    pub token_cookie: String,

    /// Cookie store: MAC key, at least 16 bytes. Random when unset.
    pub hash_key: Option<String>,

    /// Cookie store: AES key of 16, 24 or 32 bytes. Random when unset.
    pub block_key: Option<String>,

    /// Memory store: seconds a saved session lives; 0 keeps it forever.
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cookie: Cookie::default(),
            lru_capacity: 100_000,
            cookie_rate: Vec::new(),
            url_rate: BTreeMap::new(),
            store: StoreKind::default(),
            id_key: None,
            token_cookie: DEFAULT_TOKEN_COOKIE.to_string(),
            hash_key: None,
            block_key: None,
            ttl_secs: 2_592_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,

    /// Access token lifetime in seconds.
    pub access_max_age: i64,

    /// Refresh token lifetime in seconds; 0 never expires.
    pub refresh_max_age: i64,

    pub hash_key: Option<String>,
    pub block_key: Option<String>,

    /// Request headers searched for an access token, in order.
    pub token_headers: Vec<String>,

    /// Request headers searched by the refresh endpoint, in order.
    pub refresh_token_headers: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            access_max_age: DEFAULT_ACCESS_MAX_AGE,
            refresh_max_age: 0,
            hash_key: None,
            block_key: None,
            token_headers: vec![ACCESS_TOKEN_HEADER.to_string(), REFRESH_TOKEN_HEADER.to_string()],
            refresh_token_headers: vec![REFRESH_TOKEN_HEADER.to_string(), ACCESS_TOKEN_HEADER.to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
