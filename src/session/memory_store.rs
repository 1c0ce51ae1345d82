//! Server-side document store kept in process memory.
//!
//! Each session is stored as a copy of its values plus the time of the last
//! save. Entries older than the TTL are treated as absent and dropped on
//! access or by [`MemoryStore::purge_expired`].

use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use dashmap::DashMap;
use futures_util::future::BoxFuture;

use super::store::{Store, StoreError};
use super::Values;
use crate::http::writer::ResponseWriter;

pub const DEFAULT_ID_KEY: &str = "_id";

#[derive(Debug, Clone)]
struct Document {
    values: Values,
    updated_at: Instant,
}

#[derive(Debug)]
pub struct MemoryStore {
    documents: DashMap<String, Document>,
    ttl: Option<Duration>,
    id_key: String,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemoryStore {
    /// `ttl` of `None` keeps documents until they are removed.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            documents: DashMap::new(),
            ttl,
            id_key: DEFAULT_ID_KEY.to_string(),
        }
    }

    pub fn with_id_key(mut self, id_key: impl Into<String>) -> Self {
        self.id_key = id_key.into();
        self
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Drop every expired document. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.documents.len();
        self.documents.retain(|_, doc| !self.expired(doc));
        before.saturating_sub(self.documents.len())
    }

    fn expired(&self, doc: &Document) -> bool {
        self.ttl.is_some_and(|ttl| doc.updated_at.elapsed() > ttl)
    }

    fn find(&self, id: &str) -> Option<Values> {
        let doc = self.documents.get(id)?;
        if self.expired(&doc) {
            drop(doc);
            self.documents.remove(id);
            return None;
        }
        Some(doc.values.clone())
    }
}

impl Store for MemoryStore {
    fn get<'a>(
        &'a self,
        _headers: &'a HeaderMap,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Values>, StoreError>> {
        let found = self.find(id);
        Box::pin(async move { Ok(found) })
    }

    fn save<'a>(
        &'a self,
        _writer: &'a mut ResponseWriter,
        id: &'a str,
        values: &'a Values,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        if values.is_empty() || id.is_empty() {
            self.documents.remove(id);
        } else {
            self.documents.insert(
                id.to_string(),
                Document {
                    values: values.clone(),
                    updated_at: Instant::now(),
                },
            );
        }
        Box::pin(async { Ok(()) })
    }

    fn id_key(&self) -> &str {
        &self.id_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values() -> Values {
        json!({"_id": "s1", "n": 1}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_save_get_and_remove() {
        let store = MemoryStore::default();
        let mut writer = ResponseWriter::detached();
        let headers = HeaderMap::new();

        store.save(&mut writer, "s1", &values()).await.unwrap();
        assert_eq!(store.get(&headers, "s1").await.unwrap(), Some(values()));

        store.save(&mut writer, "s1", &Values::new()).await.unwrap();
        assert_eq!(store.get(&headers, "s1").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expired_documents_disappear() {
        let store = MemoryStore::new(Some(Duration::from_millis(20)));
        let mut writer = ResponseWriter::detached();
        store.save(&mut writer, "s1", &values()).await.unwrap();
        store.save(&mut writer, "s2", &values()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get(&HeaderMap::new(), "s1").await.unwrap(), None);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }
}
