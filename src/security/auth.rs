//! Token authentication: login, guard and refresh.
//!
//! # Data Flow
//! ```text
//! login:   verifier(args…) → (200, uid) → access + refresh tokens → JSON AuthToken
//! guard:   ACCESS-TOKEN → access codec → grant "access" + UA fingerprint → Uid
//! refresh: token header → refresh codec → grant "refresh" + UA fingerprint
//!          → new access token, same refresh token
//! ```
//!
//! # Design Decisions
//! - Both tokens carry the same claims and differ in grant type and max age
//! - The User-Agent fingerprint (FNV-1, 64 bit) binds a token to its client
//! - Every failure answers 401; nothing is reissued on failure

use std::sync::Arc;

use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::token::{random_bytes, Claims, Clock, TokenCodec, TokenError, ISSUED_AT_KEY};
use crate::http::context::{handler, Context, Handler};
use crate::http::inject::{FromContext, Injectable, Rejection};
use crate::http::reply::Json;

pub const KEY_USER_ID: &str = "_uid";
pub const KEY_AGENT_HASH: &str = "_agh";
pub const KEY_GRANT_TYPE: &str = "_grt";

pub const GRANT_ACCESS: &str = "access";
pub const GRANT_REFRESH: &str = "refresh";

pub const ACCESS_TOKEN_HEADER: &str = "ACCESS-TOKEN";
pub const REFRESH_TOKEN_HEADER: &str = "REFRESH-TOKEN";

pub const DEFAULT_ACCESS_MAX_AGE: i64 = 1800;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("auth: token not present")]
    NoToken,

    #[error("auth: {0}")]
    Token(#[from] TokenError),

    #[error("auth: grant type mismatched: expect {expected}, got {got}")]
    GrantType { expected: &'static str, got: String },

    #[error("auth: user agent mismatched")]
    UserAgent,

    #[error("auth: uid is not present in token")]
    NoUid,
}

/// The authenticated user id, registered by [`AuthEngine::guard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uid(pub String);

impl FromContext for Uid {
    fn from_context<'a>(ctx: &'a mut Context) -> BoxFuture<'a, Result<Self, Rejection>> {
        let uid = ctx.get::<Uid>().cloned().map_err(Rejection::from);
        Box::pin(async move { uid })
    }
}

/// Login and refresh response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthToken {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub max_age: i64,
}

#[derive(Debug, Clone)]
pub struct AuthEngine {
    access: TokenCodec,
    refresh: TokenCodec,
    token_headers: Vec<String>,
    refresh_headers: Vec<String>,
}

impl AuthEngine {
    pub fn new(access: TokenCodec, refresh: TokenCodec) -> Self {
        Self {
            access,
            refresh,
            token_headers: vec![ACCESS_TOKEN_HEADER.to_string(), REFRESH_TOKEN_HEADER.to_string()],
            refresh_headers: vec![REFRESH_TOKEN_HEADER.to_string(), ACCESS_TOKEN_HEADER.to_string()],
        }
    }

    /// Both codecs share the keys; missing keys are generated.
    pub fn with_keys(
        access_max_age: i64,
        refresh_max_age: i64,
        hash_key: Option<Vec<u8>>,
        block_key: Option<Vec<u8>>,
    ) -> Result<Self, TokenError> {
        let hash_key = hash_key.filter(|k| !k.is_empty()).unwrap_or_else(|| random_bytes(16));
        let block_key = block_key.filter(|k| !k.is_empty()).unwrap_or_else(|| random_bytes(16));
        let access = TokenCodec::new(access_max_age, Some(hash_key.clone()), Some(block_key.clone()))?;
        let refresh = TokenCodec::new(refresh_max_age, Some(hash_key), Some(block_key))?;
        Ok(Self::new(access, refresh))
    }

    /// Header names searched for an access token, in order.
    pub fn with_token_headers(mut self, headers: Vec<String>) -> Self {
        self.token_headers = headers;
        self
    }

    /// Header names searched by [`AuthEngine::refresh`], in order.
    ///
    /// Defaults to `REFRESH-TOKEN` then `ACCESS-TOKEN`, so a client sending
    /// both headers to the refresh endpoint is answered from its refresh
    /// token.
    pub fn with_refresh_headers(mut self, headers: Vec<String>) -> Self {
        self.refresh_headers = headers;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.access = self.access.with_clock(clock.clone());
        self.refresh = self.refresh.with_clock(clock);
        self
    }

    pub fn access_max_age(&self) -> i64 {
        self.access.max_age()
    }

    /// Issue an access and a refresh token for `uid`.
    pub fn new_auth_token(&self, uid: &str, headers: &HeaderMap) -> Result<AuthToken, AuthError> {
        let mut claims = Claims::new();
        claims.insert(KEY_USER_ID.to_string(), Value::from(uid));
        claims.insert(KEY_AGENT_HASH.to_string(), Value::from(agent_hash(headers)));
        claims.insert(KEY_GRANT_TYPE.to_string(), Value::from(GRANT_ACCESS));
        let access_token = self.access.encode(&claims)?;

        claims.insert(KEY_GRANT_TYPE.to_string(), Value::from(GRANT_REFRESH));
        let refresh_token = self.refresh.encode(&claims)?;

        Ok(AuthToken {
            access_token,
            refresh_token,
            max_age: self.access.max_age(),
        })
    }

    /// The user id carried by the request's access token.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let token = find_token(headers, &self.token_headers).ok_or(AuthError::NoToken)?;
        let claims = self.access.decode(token)?;
        check_claims(&claims, GRANT_ACCESS, headers)?;
        claims
            .get(KEY_USER_ID)
            .and_then(Value::as_str)
            .filter(|uid| !uid.is_empty())
            .map(str::to_string)
            .ok_or(AuthError::NoUid)
    }

    /// A new access token for the request's refresh token.
    pub fn refresh(&self, headers: &HeaderMap) -> Result<AuthToken, AuthError> {
        let token = find_token(headers, &self.refresh_headers).ok_or(AuthError::NoToken)?;
        let mut claims = self.refresh.decode(token)?;
        check_claims(&claims, GRANT_REFRESH, headers)?;

        claims.remove(ISSUED_AT_KEY);
        claims.insert(KEY_GRANT_TYPE.to_string(), Value::from(GRANT_ACCESS));
        Ok(AuthToken {
            access_token: self.access.encode(&claims)?,
            refresh_token: token.to_string(),
            max_age: self.access.max_age(),
        })
    }

    /// Login endpoint.
    ///
    /// `verifier` is called with injected arguments and returns
    /// `(status, uid)`; on any status other than 200 the second value is the
    /// error message.
    pub fn login_handler<F, Args>(self: &Arc<Self>, verifier: F) -> Handler
    where
        F: Injectable<Args, Output = (StatusCode, String)>,
        Args: 'static,
    {
        let engine = self.clone();
        handler(move |ctx| {
            let engine = engine.clone();
            let verifier = verifier.clone();
            Box::pin(async move {
                let (status, uid) = match verifier.call(ctx).await {
                    Ok(out) => out,
                    Err(rejection) => {
                        rejection.reply(ctx).await;
                        return;
                    }
                };
                if status != StatusCode::OK {
                    ctx.reply_error(status, uid).await;
                    return;
                }

                match engine.new_auth_token(&uid, ctx.headers()) {
                    Ok(token) => {
                        tracing::debug!(uid = %uid, "login succeeded");
                        ctx.reply(StatusCode::OK, Json(token)).await;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to issue auth token");
                        ctx.reply_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
                            .await;
                    }
                }
            })
        })
    }

    /// Middleware admitting requests with a valid access token and
    /// registering their [`Uid`].
    pub fn guard(self: &Arc<Self>) -> Handler {
        let engine = self.clone();
        handler(move |ctx| {
            let engine = engine.clone();
            Box::pin(async move {
                let authenticated = engine.authenticate(ctx.headers());
                match authenticated {
                    Ok(uid) => {
                        ctx.map_value(Uid(uid));
                        ctx.next().await;
                    }
                    Err(err) => {
                        tracing::debug!(path = ctx.path(), error = %err, "authentication failed");
                        ctx.reply_error(StatusCode::UNAUTHORIZED, err.to_string()).await;
                    }
                }
            })
        })
    }

    /// Refresh endpoint.
    pub fn refresh_handler(self: &Arc<Self>) -> Handler {
        let engine = self.clone();
        handler(move |ctx| {
            let engine = engine.clone();
            Box::pin(async move {
                let refreshed = engine.refresh(ctx.headers());
                match refreshed {
                    Ok(token) => ctx.reply(StatusCode::OK, Json(token)).await,
                    Err(err) => {
                        tracing::debug!(error = %err, "token refresh refused");
                        ctx.reply_error(StatusCode::UNAUTHORIZED, err.to_string()).await;
                    }
                }
            })
        })
    }
}

/// The first non-empty value among `names`.
fn find_token<'h>(headers: &'h HeaderMap, names: &[String]) -> Option<&'h str> {
    names.iter().find_map(|name| {
        headers
            .get(name.as_str())
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    })
}

fn check_claims(claims: &Claims, grant: &'static str, headers: &HeaderMap) -> Result<(), AuthError> {
    let got = claims.get(KEY_GRANT_TYPE).and_then(Value::as_str).unwrap_or_default();
    if got != grant {
        return Err(AuthError::GrantType {
            expected: grant,
            got: got.to_string(),
        });
    }
    if claims.get(KEY_AGENT_HASH).and_then(Value::as_str) != Some(agent_hash(headers).as_str()) {
        return Err(AuthError::UserAgent);
    }
    Ok(())
}

fn agent_hash(headers: &HeaderMap) -> String {
    let agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    hash64(agent)
}

/// FNV-1 64-bit hash as 16 hex digits.
pub fn hash64(input: &str) -> String {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let hash = input
        .bytes()
        .fold(OFFSET, |h, b| h.wrapping_mul(PRIME) ^ u64::from(b));
    format!("{hash:016x}")
}
