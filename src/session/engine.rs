//! Session middleware: load, create, throttle and persist sessions.
//!
//! # Load order
//! 1. No id cookie: create a session (cookie creation is limited per IP)
//! 2. Id found in the LRU: use it if its stored id matches the cookie
//! 3. Otherwise ask the [`Store`]; a miss, a tampered value or a mismatched
//!    id all fall back to a new session, a store outage answers 500
//!
//! # URL rate policy
//! Keys look like `POST:/login` or `ANY:/api`. A request is counted by every
//! key that prefixes `METHOD:/path` or `ANY:/path`, and passes only if all of
//! them admit it. The limiters live in the session, so limits are per client.
//! With a non-empty policy a request no key covers is a configuration error.

use std::net::IpAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, Method};
use serde_json::Value;

use super::cookie::Cookie;
use super::store::Store;
use super::{Session, SessionData, SessionError, Values};
use crate::cache::{CacheEntry, CacheKey, SharedCache};
use crate::http::context::{handler, Handler};
use crate::http::writer::{hook, BoxError, ResponseWriter};
use crate::observability::metrics;
use crate::security::rate_limit::{ip_limiter, Scope};
use crate::security::token::random_bytes;

const ANY_PREFIX: &str = "ANY:";

/// Per-session rate limits keyed by `METHOD:/path-prefix`.
#[derive(Debug, Clone, Default)]
pub struct UrlRatePolicy {
    rules: Vec<(String, Vec<Scope>)>,
}

impl UrlRatePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the scopes of `key`.
    pub fn rule(mut self, key: impl Into<String>, scopes: Vec<Scope>) -> Self {
        let key = key.into();
        self.rules.retain(|(k, _)| *k != key);
        self.rules.push((key, scopes));
        // Longest keys first.
        self.rules
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Every rule covering `method` and `path`, longest key first.
    pub fn matching<'a>(
        &'a self,
        method: &Method,
        path: &str,
    ) -> impl Iterator<Item = (&'a str, &'a [Scope])> + 'a {
        let exact = format!("{}:{}", method.as_str(), path);
        let any = format!("{ANY_PREFIX}{path}");
        self.rules
            .iter()
            .filter(move |(key, _)| exact.starts_with(key.as_str()) || any.starts_with(key.as_str()))
            .map(|(key, scopes)| (key.as_str(), scopes.as_slice()))
    }
}

/// Creates, caches and persists sessions.
pub struct SessionEngine {
    cookie: Cookie,
    store: Arc<dyn Store>,
    cache: Arc<SharedCache>,
    cookie_rate: Vec<Scope>,
    url_rate: UrlRatePolicy,
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("cookie", &self.cookie.name)
            .field("id_key", &self.store.id_key())
            .field("cookie_rate", &self.cookie_rate)
            .field("url_rules", &self.url_rate.len())
            .finish()
    }
}

impl SessionEngine {
    pub fn new(store: Arc<dyn Store>, cache: Arc<SharedCache>) -> Self {
        Self {
            cookie: Cookie::default(),
            store,
            cache,
            cookie_rate: Vec::new(),
            url_rate: UrlRatePolicy::default(),
        }
    }

    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookie = cookie;
        self
    }

    /// Limit how often one client IP may be handed a new session.
    pub fn with_cookie_rate(mut self, scopes: Vec<Scope>) -> Self {
        self.cookie_rate = scopes;
        self
    }

    pub fn with_url_rate(mut self, policy: UrlRatePolicy) -> Self {
        self.url_rate = policy;
        self
    }

    pub fn cookie(&self) -> &Cookie {
        &self.cookie
    }

    pub fn cache(&self) -> &Arc<SharedCache> {
        &self.cache
    }

    /// The session for a request with `headers`, coming from `client_ip`.
    pub async fn get_session(
        &self,
        headers: &HeaderMap,
        client_ip: Option<IpAddr>,
    ) -> Result<Session, SessionError> {
        let Some(id) = self.cookie.read(headers) else {
            return self.new_session(client_ip);
        };

        let key = CacheKey::Session(id.clone());
        if let Some(data) = self.cache.get(&key).and_then(|e| e.as_session().cloned()) {
            // Clients can send any id, including one that collides with
            // another cache key.
            if self.holds_id(&data.values.lock(), &id) {
                return Ok(Session::new(id, data));
            }
            tracing::debug!(session = %id, "cached session id mismatched");
            return self.new_session(client_ip);
        }

        match self.store.get(headers, &id).await {
            Ok(Some(values)) if self.holds_id(&values, &id) => {
                let data = Arc::new(SessionData::new(values));
                self.cache.set(key, CacheEntry::Session(data.clone()));
                Ok(Session::new(id, data))
            }
            Ok(Some(_)) => {
                tracing::debug!(session = %id, "stored session id mismatched");
                self.new_session(client_ip)
            }
            Ok(None) => self.new_session(client_ip),
            Err(err) if err.is_backend() => Err(err.into()),
            Err(err) => {
                tracing::debug!(session = %id, error = %err, "discarding unreadable session");
                self.new_session(client_ip)
            }
        }
    }

    /// Write the cookie and store the values if the session changed.
    ///
    /// An emptied session deletes its cookie and store entry but stays in
    /// the cache.
    pub async fn save_session(
        &self,
        writer: &mut ResponseWriter,
        session: &Session,
    ) -> Result<(), SessionError> {
        let Some(values) = session.data().take_modified() else {
            return Ok(());
        };
        if values.is_empty() || session.id().is_empty() {
            self.cookie.delete(writer.headers_mut());
        } else {
            self.cookie.set(writer.headers_mut(), session.id());
        }
        self.store.save(writer, session.id(), &values).await?;
        Ok(())
    }

    /// Count the request against every matching URL rule.
    pub fn check_url_rate(
        &self,
        method: &Method,
        path: &str,
        session: &Session,
    ) -> Result<(), SessionError> {
        if self.url_rate.is_empty() {
            return Ok(());
        }

        let mut found = false;
        let mut limited = false;
        for (key, scopes) in self.url_rate.matching(method, path) {
            found = true;
            if session.data().limiter(key, scopes).reached() {
                limited = true;
            }
        }

        if limited {
            return Err(SessionError::Overrun);
        }
        if !found {
            return Err(SessionError::PolicyMissing(format!("{}:{}", method.as_str(), path)));
        }
        Ok(())
    }

    /// Middleware exposing the [`Session`] to later handlers.
    pub fn middleware(self: &Arc<Self>) -> Handler {
        let engine = self.clone();
        handler(move |ctx| {
            let engine = engine.clone();
            Box::pin(async move {
                let headers = ctx.headers().clone();
                let session = match engine.get_session(&headers, ctx.client_ip()).await {
                    Ok(session) => session,
                    Err(err) => {
                        if matches!(err, SessionError::Store(_)) {
                            tracing::warn!(path = ctx.path(), error = %err, "session store failed");
                            engine.cookie.delete(ctx.writer_mut().headers_mut());
                        } else {
                            tracing::debug!(path = ctx.path(), error = %err, "session refused");
                        }
                        if matches!(err, SessionError::Overrun) {
                            metrics::record_rate_limited("session");
                        }
                        ctx.reply_error(err.status(), err.to_string()).await;
                        return;
                    }
                };

                ctx.map_value(session.clone());
                let saver = engine.clone();
                let saved = session.clone();
                ctx.writer_mut().before_write(hook(move |w| {
                    Box::pin(async move { saver.save_session(w, &saved).await.map_err(BoxError::from) })
                }));

                if let Err(err) = engine.check_url_rate(ctx.method(), ctx.path(), &session) {
                    match err {
                        SessionError::Overrun => {
                            tracing::debug!(path = ctx.path(), session = session.id(), "url rate limit exceeded");
                            metrics::record_rate_limited("url");
                        }
                        _ => tracing::error!(path = ctx.path(), error = %err, "no url rate policy"),
                    }
                    ctx.reply_error(err.status(), err.to_string()).await;
                    return;
                }

                ctx.next().await;
            })
        })
    }

    fn holds_id(&self, values: &Values, id: &str) -> bool {
        values.get(self.store.id_key()).and_then(Value::as_str) == Some(id)
    }

    fn new_session(&self, client_ip: Option<IpAddr>) -> Result<Session, SessionError> {
        if !self.cookie_rate.is_empty() {
            let ip = client_ip.ok_or(SessionError::Ip)?;
            if ip_limiter(&self.cache, ip, &self.cookie_rate).is_some_and(|l| l.reached()) {
                return Err(SessionError::Overrun);
            }
        }

        let id = new_session_id();
        let mut values = Values::new();
        values.insert(self.store.id_key().to_string(), Value::from(id.clone()));
        let data = Arc::new(SessionData::new(values));
        self.cache
            .set(CacheKey::Session(id.clone()), CacheEntry::Session(data.clone()));
        metrics::record_session_created();
        Ok(Session::new(id, data))
    }
}

/// 24 hex digits: 4 bytes of unix time followed by 8 random bytes.
pub fn new_session_id() -> String {
    let secs = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
    let mut raw = secs.to_be_bytes().to_vec();
    raw.extend_from_slice(&random_bytes(8));
    raw.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::rate_limit::sec_scopes;
    use crate::session::store::NoStore;
    use crate::session::MemoryStore;
    use axum::http::header::{COOKIE, SET_COOKIE};
    use axum::http::HeaderValue;

    fn engine(store: Arc<dyn Store>) -> SessionEngine {
        SessionEngine::new(store, Arc::new(SharedCache::new(64)))
    }

    fn with_cookie(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(&format!("_session_id={id}")).unwrap());
        headers
    }

    fn ip() -> Option<IpAddr> {
        Some("10.1.1.1".parse().unwrap())
    }

    #[test]
    fn test_session_id_shape() {
        let id = new_session_id();
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_session_id());
    }

    #[test]
    fn test_policy_matches_every_prefix() {
        let policy = UrlRatePolicy::new()
            .rule("POST:/login", sec_scopes(&[1000, 10]).unwrap())
            .rule("ANY:/login", sec_scopes(&[1500, 10]).unwrap())
            .rule("ANY:/", sec_scopes(&[3000, 10]).unwrap())
            .rule("GET:/hello", sec_scopes(&[3000, 10]).unwrap());

        let keys: Vec<_> = policy.matching(&Method::POST, "/login").map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["POST:/login", "ANY:/login", "ANY:/"]);

        let keys: Vec<_> = policy.matching(&Method::GET, "/world").map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["ANY:/"]);
    }

    #[tokio::test]
    async fn test_new_session_is_cached_and_reloaded() {
        let engine = engine(Arc::new(NoStore));
        let first = engine.get_session(&HeaderMap::new(), ip()).await.unwrap();
        assert_eq!(first.get_str("_id").as_deref(), Some(first.id()));
        assert!(!first.is_modified());

        first.set("n", 1);
        let again = engine.get_session(&with_cookie(first.id()), ip()).await.unwrap();
        assert_eq!(again.id(), first.id());
        assert_eq!(again.get_as::<i64>("n"), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_id_gets_fresh_session() {
        let engine = engine(Arc::new(NoStore));
        let session = engine.get_session(&with_cookie("forged"), ip()).await.unwrap();
        assert_ne!(session.id(), "forged");
    }

    #[tokio::test]
    async fn test_save_writes_cookie_and_store() {
        let store = Arc::new(MemoryStore::default());
        let engine = engine(store.clone());
        let session = engine.get_session(&HeaderMap::new(), ip()).await.unwrap();

        let mut writer = ResponseWriter::detached();
        engine.save_session(&mut writer, &session).await.unwrap();
        assert!(writer.headers().get(SET_COOKIE).is_none());

        session.set("user", "ann");
        engine.save_session(&mut writer, &session).await.unwrap();
        let cookie = writer.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with(&format!("_session_id={}", session.id())));
        assert_eq!(store.len(), 1);

        // Evicted from the cache, the session comes back from the store.
        engine.cache().clear();
        let loaded = engine.get_session(&with_cookie(session.id()), ip()).await.unwrap();
        assert_eq!(loaded.get_str("user").as_deref(), Some("ann"));

        loaded.clear();
        let mut writer = ResponseWriter::detached();
        engine.save_session(&mut writer, &loaded).await.unwrap();
        let cookie = writer.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cookie_creation_is_limited_per_ip() {
        let engine = engine(Arc::new(NoStore)).with_cookie_rate(sec_scopes(&[3, 100]).unwrap());
        for _ in 0..3 {
            engine.get_session(&HeaderMap::new(), ip()).await.unwrap();
        }
        assert!(matches!(
            engine.get_session(&HeaderMap::new(), ip()).await,
            Err(SessionError::Overrun)
        ));
        assert!(matches!(
            engine.get_session(&HeaderMap::new(), None).await,
            Err(SessionError::Ip)
        ));
        // Another client is unaffected.
        let other = Some("10.1.1.2".parse().unwrap());
        assert!(engine.get_session(&HeaderMap::new(), other).await.is_ok());
    }

    #[tokio::test]
    async fn test_url_rate_counts_all_matching_rules() {
        let policy = UrlRatePolicy::new()
            .rule("POST:/login", sec_scopes(&[2, 10]).unwrap())
            .rule("ANY:/login", sec_scopes(&[3, 10]).unwrap());
        let engine = engine(Arc::new(NoStore)).with_url_rate(policy);
        let session = engine.get_session(&HeaderMap::new(), ip()).await.unwrap();

        assert!(engine.check_url_rate(&Method::POST, "/login", &session).is_ok());
        assert!(engine.check_url_rate(&Method::POST, "/login", &session).is_ok());
        assert!(matches!(
            engine.check_url_rate(&Method::POST, "/login", &session),
            Err(SessionError::Overrun)
        ));
        // ANY:/login saw all three POSTs.
        assert!(matches!(
            engine.check_url_rate(&Method::GET, "/login", &session),
            Err(SessionError::Overrun)
        ));
        assert!(matches!(
            engine.check_url_rate(&Method::GET, "/other", &session),
            Err(SessionError::PolicyMissing(_))
        ));
    }
}
