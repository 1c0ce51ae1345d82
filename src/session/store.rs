//! Persistence seam for session values.

use axum::http::HeaderMap;
use futures_util::future::BoxFuture;
use thiserror::Error;

use super::Values;
use crate::http::writer::ResponseWriter;
use crate::security::token::TokenError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session: id mismatched")]
    IdMismatch,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("session store unavailable: {0}")]
    Backend(String),
}

impl StoreError {
    /// True for failures of the storage itself rather than of the data a
    /// client presented.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Where session values live between requests.
///
/// `get` returns `Ok(None)` when the store knows nothing about `id`.
/// `save` with an empty map or an empty id removes the session.
pub trait Store: Send + Sync + 'static {
    fn get<'a>(
        &'a self,
        headers: &'a HeaderMap,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Values>, StoreError>>;

    fn save<'a>(
        &'a self,
        writer: &'a mut ResponseWriter,
        id: &'a str,
        values: &'a Values,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// The reserved value key holding the session id.
    fn id_key(&self) -> &str;
}

/// Keeps nothing: sessions live only as long as their cache entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStore;

impl Store for NoStore {
    fn get<'a>(
        &'a self,
        _headers: &'a HeaderMap,
        _id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Values>, StoreError>> {
        Box::pin(async { Ok(None) })
    }

    fn save<'a>(
        &'a self,
        _writer: &'a mut ResponseWriter,
        _id: &'a str,
        _values: &'a Values,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }

    fn id_key(&self) -> &str {
        "_id"
    }
}
