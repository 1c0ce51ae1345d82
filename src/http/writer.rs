//! Deferred-status response writer.
//!
//! # Responsibilities
//! - Hold the pending status and headers until the first body write
//! - Run pre-write hooks (LIFO) right before the head is emitted
//! - Track the number of body bytes written
//! - Stream body chunks to the transport and expose the client-gone signal
//!
//! # Design Decisions
//! - The head travels on a oneshot channel, body chunks on a bounded mpsc
//!   channel; the service turns them into a streaming response
//! - `size == -1` means nothing has been emitted yet
//! - Hooks see the writer as unwritten; a nested `write_header_now` is a no-op
//! - Small writes are coalesced into one chunk until `flush` or 8 KiB

use axum::http::header::IntoHeaderName;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use hyper::upgrade::OnUpgrade;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const NOT_WRITTEN: i64 = -1;
const CHUNK_SIZE: usize = 8 * 1024;
const BODY_CHANNEL_CAPACITY: usize = 16;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A pre-write hook. It may inspect and modify the writer (set headers,
/// change the status) but must not rely on writing body bytes.
pub type Hook =
    Box<dyn for<'a> FnOnce(&'a mut ResponseWriter) -> BoxFuture<'a, Result<(), BoxError>> + Send>;

/// Build a [`Hook`] from a closure.
pub fn hook<F>(f: F) -> Hook
where
    F: for<'a> FnOnce(&'a mut ResponseWriter) -> BoxFuture<'a, Result<(), BoxError>> + Send + 'static,
{
    Box::new(f)
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("client disconnected")]
    Closed,

    #[error("connection does not support upgrades")]
    NotUpgradable,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The emitted response head.
#[derive(Debug)]
pub struct Head {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

pub struct ResponseWriter {
    status: StatusCode,
    headers: HeaderMap,
    size: i64,
    early_bytes: i64,
    hooks: Vec<Hook>,
    flushing: bool,
    buf: BytesMut,
    head_tx: Option<oneshot::Sender<Head>>,
    body_tx: Option<mpsc::Sender<Bytes>>,
    upgrade: Option<OnUpgrade>,
    hook_errors: Vec<BoxError>,
}

impl std::fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("status", &self.status)
            .field("size", &self.size)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Receiving half of a response, owned by the transport.
pub struct ResponseReceiver {
    head: oneshot::Receiver<Head>,
    body: mpsc::Receiver<Bytes>,
}

impl ResponseWriter {
    /// A detached writer: everything written is discarded.
    pub fn detached() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            size: NOT_WRITTEN,
            early_bytes: 0,
            hooks: Vec::new(),
            flushing: false,
            buf: BytesMut::with_capacity(CHUNK_SIZE),
            head_tx: None,
            body_tx: None,
            upgrade: None,
            hook_errors: Vec::new(),
        }
    }

    /// A connected writer and the receiver the transport reads from.
    pub fn channel() -> (Self, ResponseReceiver) {
        let mut writer = Self::detached();
        let receiver = writer.connect(None);
        (writer, receiver)
    }

    /// Reset all per-response state and attach fresh channels.
    pub(crate) fn connect(&mut self, upgrade: Option<OnUpgrade>) -> ResponseReceiver {
        let (head_tx, head) = oneshot::channel();
        let (body_tx, body) = mpsc::channel(BODY_CHANNEL_CAPACITY);

        self.status = StatusCode::OK;
        self.headers.clear();
        self.size = NOT_WRITTEN;
        self.early_bytes = 0;
        self.hooks.clear();
        self.flushing = false;
        self.buf.clear();
        self.head_tx = Some(head_tx);
        self.body_tx = Some(body_tx);
        self.upgrade = upgrade;
        self.hook_errors.clear();

        ResponseReceiver { head, body }
    }

    /// Drop the transport so the pooled writer holds no channel.
    pub(crate) fn disconnect(&mut self) {
        self.head_tx = None;
        self.body_tx = None;
        self.upgrade = None;
        self.hooks.clear();
        self.buf.clear();
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Set the pending status. Ignored once the head has been emitted.
    pub fn set_status(&mut self, code: StatusCode) {
        if self.status == code {
            return;
        }
        if self.written() {
            tracing::warn!(
                current = self.status.as_u16(),
                wanted = code.as_u16(),
                "headers were already written, status not changed"
            );
            return;
        }
        self.status = code;
    }

    /// Bytes written to the body, or -1 before the head is emitted.
    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn written(&self) -> bool {
        self.size >= 0
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Pending headers. Changes after the head is emitted are not sent.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_header<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Register a hook to run right before the head is emitted.
    pub fn before_write(&mut self, hook: Hook) {
        self.hooks.push(hook);
    }

    /// Errors returned by hooks since the last reset.
    pub fn take_hook_errors(&mut self) -> Vec<BoxError> {
        std::mem::take(&mut self.hook_errors)
    }

    /// Run the hooks (LIFO) and emit the status and headers.
    pub async fn write_header_now(&mut self) {
        if self.written() || self.flushing {
            return;
        }

        self.flushing = true;
        while let Some(hook) = self.hooks.pop() {
            if let Err(err) = hook(self).await {
                tracing::warn!(error = %err, "pre-write hook failed");
                self.hook_errors.push(err);
            }
        }
        self.flushing = false;

        self.size = self.early_bytes;
        if let Some(tx) = self.head_tx.take() {
            let head = Head {
                status: self.status,
                headers: std::mem::take(&mut self.headers),
            };
            // The transport may already be gone; the body sender reports it.
            let _ = tx.send(head);
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.write_header_now().await;

        self.buf.extend_from_slice(data);
        let n = data.len() as i64;
        if self.written() {
            self.size += n;
        } else {
            self.early_bytes += n;
        }

        if self.buf.len() >= CHUNK_SIZE {
            self.flush_buffer().await?;
        }
        Ok(data.len())
    }

    pub async fn write_str(&mut self, s: &str) -> Result<usize, WriteError> {
        self.write(s.as_bytes()).await
    }

    /// Emit the head if needed and push buffered bytes to the client.
    pub async fn flush(&mut self) -> Result<(), WriteError> {
        self.write_header_now().await;
        self.flush_buffer().await
    }

    async fn flush_buffer(&mut self) -> Result<(), WriteError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        match self.body_tx.as_ref() {
            Some(tx) => tx.send(chunk).await.map_err(|_| WriteError::Closed),
            None => Ok(()),
        }
    }

    /// Emit everything and close the body stream.
    pub async fn finish(&mut self) -> Result<(), WriteError> {
        let result = self.flush().await;
        self.body_tx = None;
        result
    }

    /// True once the client stopped reading the response.
    pub fn is_closed(&self) -> bool {
        match self.body_tx.as_ref() {
            Some(tx) => tx.is_closed(),
            None => self.head_tx.is_none(),
        }
    }

    /// Resolves when the client goes away.
    ///
    /// The returned future holds a sender; drop it before `finish`.
    pub fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let tx = self.body_tx.clone();
        async move {
            match tx {
                Some(tx) => tx.closed().await,
                None => std::future::pending::<()>().await,
            }
        }
    }

    /// Switch protocols: emit a 101 head and hand back the upgrade future.
    pub async fn hijack(&mut self) -> Result<OnUpgrade, WriteError> {
        let upgrade = self.upgrade.take().ok_or(WriteError::NotUpgradable)?;
        self.set_status(StatusCode::SWITCHING_PROTOCOLS);
        self.write_header_now().await;
        self.body_tx = None;
        Ok(upgrade)
    }
}

impl ResponseReceiver {
    /// Wait for the head. `None` if the writer was dropped without emitting one.
    pub async fn head(&mut self) -> Option<Head> {
        (&mut self.head).await.ok()
    }

    /// Build the transport response, streaming the body as it is written.
    pub async fn into_response(mut self) -> axum::response::Response {
        let head = match self.head().await {
            Some(head) => head,
            None => {
                let mut response = axum::response::Response::new(axum::body::Body::empty());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                return response;
            }
        };

        let stream = futures_util::stream::unfold(self.body, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<Bytes, std::convert::Infallible>(chunk), rx))
        });
        let mut response = axum::response::Response::new(axum::body::Body::from_stream(stream));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        response
    }

    /// Collect the complete response. Intended for tests and in-process calls.
    pub async fn collect(mut self) -> Option<(Head, Bytes)> {
        let head = self.head().await?;
        let mut body = BytesMut::new();
        while let Some(chunk) = self.body.recv().await {
            body.extend_from_slice(&chunk);
        }
        Some((head, body.freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_hook(order: Arc<Mutex<Vec<u8>>>, id: u8) -> Hook {
        hook(move |w| {
            Box::pin(async move {
                assert!(!w.written());
                order.lock().unwrap().push(id);
                w.headers_mut()
                    .append("x-hook", HeaderValue::from_static("1"));
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_hooks_run_lifo_once_before_head() {
        let (mut w, rx) = ResponseWriter::channel();
        let order = Arc::new(Mutex::new(Vec::new()));
        w.before_write(recording_hook(order.clone(), 1));
        w.before_write(recording_hook(order.clone(), 2));
        w.set_status(StatusCode::CREATED);

        assert_eq!(w.size(), -1);
        w.write_str("hello").await.unwrap();
        w.write_header_now().await;
        w.write_str(" world").await.unwrap();
        assert_eq!(w.size(), 11);
        w.finish().await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
        let (head, body) = rx.collect().await.unwrap();
        assert_eq!(head.status, StatusCode::CREATED);
        assert_eq!(head.headers.get_all("x-hook").iter().count(), 2);
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn test_status_is_frozen_after_write() {
        let (mut w, rx) = ResponseWriter::channel();
        w.write_header_now().await;
        assert!(w.written());
        assert_eq!(w.size(), 0);

        w.set_status(StatusCode::NOT_FOUND);
        assert_eq!(w.status(), StatusCode::OK);
        w.finish().await.unwrap();

        let (head, body) = rx.collect().await.unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_hook_can_override_status() {
        let (mut w, rx) = ResponseWriter::channel();
        w.before_write(hook(|w| {
            Box::pin(async move {
                w.set_status(StatusCode::ACCEPTED);
                w.write_header_now().await;
                Ok(())
            })
        }));
        w.finish().await.unwrap();

        let (head, _) = rx.collect().await.unwrap();
        assert_eq!(head.status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_closed_when_receiver_dropped() {
        let (mut w, rx) = ResponseWriter::channel();
        assert!(!w.is_closed());
        drop(rx);
        assert!(w.is_closed());
        w.closed().await;
        assert!(matches!(w.write(&[0u8; CHUNK_SIZE]).await, Err(WriteError::Closed)));
    }

    #[tokio::test]
    async fn test_hijack_without_upgrade() {
        let (mut w, _rx) = ResponseWriter::channel();
        assert!(matches!(w.hijack().await, Err(WriteError::NotUpgradable)));
        assert!(!w.written());
    }

    #[tokio::test]
    async fn test_dropped_writer_answers_500() {
        let (w, rx) = ResponseWriter::channel();
        drop(w);
        let response = rx.into_response().await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
