//! Client-side store: values travel in a second, sealed cookie.
//!
//! # Data Flow
//! ```text
//! save: values + {id_key: id} → TokenCodec::encode → Set-Cookie <token name>
//! get:  Cookie <token name> → TokenCodec::decode → check id_key == id → values
//! ```
//!
//! The id inside the token is authoritative. A token lifted from one session
//! and replayed with another id cookie fails the id check.

use axum::http::HeaderMap;
use futures_util::future::BoxFuture;
use serde_json::Value;

use super::cookie::Cookie;
use super::store::{Store, StoreError};
use super::Values;
use crate::http::writer::ResponseWriter;
use crate::security::token::{TokenCodec, ISSUED_AT_KEY};

pub const DEFAULT_TOKEN_COOKIE: &str = "_session_tk";
pub const DEFAULT_ID_KEY: &str = "_cid";

#[derive(Debug, Clone)]
pub struct CookieStore {
    cookie: Cookie,
    id_key: String,
    codec: TokenCodec,
}

impl CookieStore {
    /// `cookie` carries the attributes of the token cookie, name included.
    pub fn new(cookie: Cookie, id_key: impl Into<String>, codec: TokenCodec) -> Self {
        Self {
            cookie,
            id_key: id_key.into(),
            codec,
        }
    }

    pub fn cookie(&self) -> &Cookie {
        &self.cookie
    }

    fn load(&self, headers: &HeaderMap, id: &str) -> Result<Option<Values>, StoreError> {
        let Some(token) = self.cookie.read(headers) else {
            return Ok(None);
        };
        let mut claims = self.codec.decode(&token)?;
        claims.remove(ISSUED_AT_KEY);
        if claims.get(&self.id_key).and_then(Value::as_str) != Some(id) {
            return Err(StoreError::IdMismatch);
        }
        Ok(Some(claims))
    }

    fn seal(&self, id: &str, values: &Values) -> Result<String, StoreError> {
        let mut claims = values.clone();
        claims.insert(self.id_key.clone(), Value::from(id));
        Ok(self.codec.encode(&claims)?)
    }
}

impl Store for CookieStore {
    fn get<'a>(
        &'a self,
        headers: &'a HeaderMap,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Values>, StoreError>> {
        let loaded = self.load(headers, id);
        Box::pin(async move { loaded })
    }

    fn save<'a>(
        &'a self,
        writer: &'a mut ResponseWriter,
        id: &'a str,
        values: &'a Values,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            if values.is_empty() || id.is_empty() {
                self.cookie.delete(writer.headers_mut());
                return Ok(());
            }
            let token = self.seal(id, values)?;
            self.cookie.set(writer.headers_mut(), &token);
            Ok(())
        })
    }

    fn id_key(&self) -> &str {
        &self.id_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn store() -> CookieStore {
        let codec = TokenCodec::new(0, Some(b"0123456789abcdef".to_vec()), Some(vec![1u8; 16])).unwrap();
        CookieStore::new(Cookie::default().renamed(DEFAULT_TOKEN_COOKIE), DEFAULT_ID_KEY, codec)
    }

    fn request_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{DEFAULT_TOKEN_COOKIE}={token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_sealed_values_reload_for_same_id() {
        let store = store();
        let values = json!({"user": "ann"}).as_object().cloned().unwrap();
        let token = store.seal("id-1", &values).unwrap();

        let loaded = store.load(&request_with(&token), "id-1").unwrap().unwrap();
        assert_eq!(loaded["user"], "ann");
        assert_eq!(loaded[DEFAULT_ID_KEY], "id-1");
    }

    #[test]
    fn test_token_replayed_under_other_id_is_rejected() {
        let store = store();
        let token = store.seal("id-1", &Values::new()).unwrap();
        assert!(matches!(
            store.load(&request_with(&token), "id-2"),
            Err(StoreError::IdMismatch)
        ));
    }

    #[test]
    fn test_missing_token_is_a_miss() {
        assert!(store().load(&HeaderMap::new(), "id-1").unwrap().is_none());
    }
}
