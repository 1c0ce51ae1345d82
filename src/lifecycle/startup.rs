//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the shared cache, session engine and auth engine from configuration
//! - Build a [`Server`] with the standard middleware stack
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order: cache, session, auth, server
//! - Routes are left to the application

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cache::SharedCache;
use crate::config::schema::{AppConfig, AuthConfig, SessionConfig, StoreKind};
use crate::http::middleware::{logger, recovery, request_id};
use crate::http::Server;
use crate::routing::RouteError;
use crate::security::auth::AuthEngine;
use crate::security::rate_limit::{sec_scopes, RateError};
use crate::security::token::{random_bytes, TokenCodec, TokenError};
use crate::session::cookie_store::{self, CookieStore};
use crate::session::memory_store::MemoryStore;
use crate::session::store::{NoStore, Store};
use crate::session::{SessionEngine, UrlRatePolicy};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Rate(#[from] RateError),

    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Engines shared by the application's handlers.
#[derive(Debug, Clone)]
pub struct Engines {
    pub cache: Arc<SharedCache>,
    pub session: Option<Arc<SessionEngine>>,
    pub auth: Option<Arc<AuthEngine>>,
}

pub fn build_engines(config: &AppConfig) -> Result<Engines, StartupError> {
    let cache = Arc::new(SharedCache::new(config.session.lru_capacity));

    let session = if config.session.enabled {
        Some(Arc::new(build_session_engine(&config.session, cache.clone())?))
    } else {
        None
    };
    let auth = if config.auth.enabled {
        Some(Arc::new(build_auth_engine(&config.auth)?))
    } else {
        None
    };

    tracing::info!(
        lru_capacity = config.session.lru_capacity,
        sessions = session.is_some(),
        auth = auth.is_some(),
        "engines initialized"
    );
    Ok(Engines { cache, session, auth })
}

pub fn build_session_engine(
    config: &SessionConfig,
    cache: Arc<SharedCache>,
) -> Result<SessionEngine, StartupError> {
    let store: Arc<dyn Store> = match config.store {
        StoreKind::None => Arc::new(NoStore),
        StoreKind::Memory => {
            let ttl = (config.ttl_secs > 0).then(|| Duration::from_secs(config.ttl_secs));
            let mut store = MemoryStore::new(ttl);
            if let Some(key) = config.id_key.as_ref() {
                store = store.with_id_key(key.clone());
            }
            Arc::new(store)
        }
        StoreKind::Cookie => {
            let block_key = key_bytes(config.block_key.as_deref()).unwrap_or_else(|| random_bytes(16));
            let codec = TokenCodec::new(
                config.cookie.max_age,
                key_bytes(config.hash_key.as_deref()),
                Some(block_key),
            )?;
            let id_key = config.id_key.as_deref().unwrap_or(cookie_store::DEFAULT_ID_KEY);
            Arc::new(CookieStore::new(
                config.cookie.renamed(config.token_cookie.clone()),
                id_key,
                codec,
            ))
        }
    };

    let mut policy = UrlRatePolicy::new();
    for (key, pairs) in &config.url_rate {
        policy = policy.rule(key.clone(), sec_scopes(pairs)?);
    }

    Ok(SessionEngine::new(store, cache)
        .with_cookie(config.cookie.clone())
        .with_cookie_rate(sec_scopes(&config.cookie_rate)?)
        .with_url_rate(policy))
}

pub fn build_auth_engine(config: &AuthConfig) -> Result<AuthEngine, StartupError> {
    let engine = AuthEngine::with_keys(
        config.access_max_age,
        config.refresh_max_age,
        key_bytes(config.hash_key.as_deref()),
        key_bytes(config.block_key.as_deref()),
    )?;
    Ok(engine
        .with_token_headers(config.token_headers.clone())
        .with_refresh_headers(config.refresh_token_headers.clone()))
}

/// A server with recovery, request ids, access logging and, when enabled,
/// sessions installed as global middleware.
pub fn build_server(config: &AppConfig, engines: &Engines) -> Server {
    let mut server = Server::from_config(&config.router);
    server.use_middleware([recovery(), request_id(), logger()]);
    if let Some(session) = engines.session.as_ref() {
        server.use_middleware([session.middleware()]);
    }
    server
}

fn key_bytes(key: Option<&str>) -> Option<Vec<u8>> {
    key.filter(|k| !k.is_empty()).map(|k| k.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds() {
        let config = AppConfig::default();
        let engines = build_engines(&config).unwrap();
        assert!(engines.session.is_some());
        assert!(engines.auth.is_some());
        assert_eq!(engines.auth.as_ref().unwrap().access_max_age(), 1800);
    }

    #[test]
    fn test_disabled_engines_are_skipped() {
        let mut config = AppConfig::default();
        config.session.enabled = false;
        config.auth.enabled = false;
        let engines = build_engines(&config).unwrap();
        assert!(engines.session.is_none() && engines.auth.is_none());
    }

    #[test]
    fn test_bad_keys_fail_startup() {
        let mut config = AppConfig::default();
        config.auth.block_key = Some("not-a-valid-key".into());
        assert!(matches!(build_engines(&config), Err(StartupError::Token(_))));

        let mut config = AppConfig::default();
        config.session.url_rate.insert("ANY:/".into(), vec![1]);
        assert!(matches!(build_engines(&config), Err(StartupError::Rate(_))));
    }
}
