//! Per-request context.
//!
//! # Responsibilities
//! - Own the writer, request head, body, route params and type registry
//! - Drive the handler chain (`next`, `abort`)
//! - Turn handler results into responses (`reply`, `reply_parts`, `stream`)
//! - Bind the request into typed values
//!
//! # Data Flow
//! ```text
//! ApiService ──reset──▶ Context ──run(middleware ++ chain)──▶ handlers
//!                          │                                     │
//!                          │◀───────── next() / reply() ─────────┘
//!                          ▼
//!                   ResponseWriter ──▶ transport
//! ```
//!
//! # Design Decisions
//! - Contexts are pooled by the server; `reset` keeps the backing storage of
//!   params, registry, handler list and errors
//! - `index` is the position in the chain; `ABORT_INDEX` stops `next`
//! - Handlers receive `&mut Context`, so a context is never shared between tasks

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::IntoHeaderName;
use axum::http::{header, request, HeaderMap, HeaderValue, Method, Request, StatusCode, Uri};
use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use hyper::upgrade::OnUpgrade;
use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt;

use super::bind::{self, BindError, BindInput, BodyKind};
use super::inject::{FromContext, Rejection};
use super::registry::{RegistryError, TypeKey, TypeRegistry};
use super::reply::{self, Event, Payload, Render, ReplyParts, StreamFn};
use super::validate::Validate;
use super::writer::{BoxError, ResponseReceiver, ResponseWriter};
use crate::routing::Params;

/// Chain position that stops `next`. Chains must be shorter than this.
pub const ABORT_INDEX: isize = 63;

/// Default cap on request bodies read by `bind` and `body_bytes`.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 << 20;

const REGISTRY_CAPACITY: usize = 8;
const READ_CHUNK: usize = 8 * 1024;

/// A request handler or middleware.
pub type Handler = Arc<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync>;

/// Build a [`Handler`] from a closure.
///
/// ```ignore
/// let h = handler(|ctx| Box::pin(async move {
///     ctx.reply(StatusCode::OK, "pong").await;
/// }));
/// ```
pub fn handler<F>(f: F) -> Handler
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub struct Context {
    writer: ResponseWriter,
    parts: request::Parts,
    body: Option<Body>,
    body_cache: Option<Bytes>,
    max_body_bytes: usize,
    remote_addr: Option<SocketAddr>,
    params: Params,
    registry: TypeRegistry,
    handlers: Vec<Handler>,
    index: isize,
    errors: Vec<BoxError>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("params", &self.params)
            .field("index", &self.index)
            .field("errors", &self.errors.len())
            .finish()
    }
}

fn empty_parts() -> request::Parts {
    Request::new(()).into_parts().0
}

impl Context {
    /// An idle context with room for `max_params` route params.
    pub fn new(max_params: usize) -> Self {
        Self {
            writer: ResponseWriter::detached(),
            parts: empty_parts(),
            body: None,
            body_cache: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            remote_addr: None,
            params: Params::with_capacity(max_params),
            registry: TypeRegistry::with_capacity(REGISTRY_CAPACITY),
            handlers: Vec::new(),
            index: -1,
            errors: Vec::new(),
        }
    }

    /// A context for `request` with a connected writer, outside any server.
    pub fn for_request(request: Request<Body>, remote_addr: Option<SocketAddr>) -> (Self, ResponseReceiver) {
        let mut ctx = Self::new(0);
        let (parts, body) = request.into_parts();
        let rx = ctx.reset(parts, body, remote_addr, None, DEFAULT_MAX_BODY_BYTES);
        (ctx, rx)
    }

    /// Prepare the context for a new request.
    pub(crate) fn reset(
        &mut self,
        parts: request::Parts,
        body: Body,
        remote_addr: Option<SocketAddr>,
        upgrade: Option<OnUpgrade>,
        max_body_bytes: usize,
    ) -> ResponseReceiver {
        self.recycle();
        self.parts = parts;
        self.body = Some(body);
        self.max_body_bytes = max_body_bytes;
        self.remote_addr = remote_addr;
        self.writer.connect(upgrade)
    }

    /// Drop everything owned by the finished request, keeping capacity.
    pub(crate) fn recycle(&mut self) {
        self.writer.disconnect();
        self.parts = empty_parts();
        self.body = None;
        self.body_cache = None;
        self.remote_addr = None;
        self.params.clear();
        self.registry.clear();
        self.handlers.clear();
        self.index = -1;
        self.errors.clear();
    }

    /// Run `middleware` followed by `chain`, then flush and close the response.
    pub(crate) async fn run(&mut self, middleware: &[Handler], chain: &[Handler]) {
        self.handlers.clear();
        self.handlers.extend_from_slice(middleware);
        self.handlers.extend_from_slice(chain);
        self.index = -1;

        self.next().await;

        self.writer.write_header_now().await;
        if let Err(err) = self.writer.finish().await {
            tracing::debug!(error = %err, "response body not delivered");
        }
        let hook_errors = self.writer.take_hook_errors();
        self.errors.extend(hook_errors);
    }

    // ---- request ----

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn request_parts(&self) -> &request::Parts {
        &self.parts
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Value of the route param `name`, or "" when absent.
    pub fn param(&self, name: &str) -> &str {
        self.params.get(name).unwrap_or("")
    }

    pub(crate) fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn client_ip(&self) -> Option<IpAddr> {
        self.remote_addr.map(|addr| addr.ip())
    }

    /// Read the whole body once; later calls return the cached bytes.
    pub async fn body_bytes(&mut self) -> Result<Bytes, BindError> {
        if let Some(bytes) = self.body_cache.as_ref() {
            return Ok(bytes.clone());
        }

        let limit = self.max_body_bytes;
        let declared = self
            .parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > limit) {
            return Err(BindError::TooLarge { limit });
        }

        let mut stream = self.body.take().unwrap_or_else(Body::empty).into_data_stream();
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BindError::Read(e.to_string()))?;
            if buf.len() + chunk.len() > limit {
                return Err(BindError::TooLarge { limit });
            }
            buf.extend_from_slice(&chunk);
        }

        let bytes = buf.freeze();
        self.body_cache = Some(bytes.clone());
        Ok(bytes)
    }

    /// Decode the request into `T` and validate it.
    ///
    /// GET and DELETE bind the query; other methods pick a decoder from the
    /// content type. Route params override decoded fields.
    pub async fn bind<T>(&mut self) -> Result<T, BindError>
    where
        T: DeserializeOwned + Validate,
    {
        let kind = BodyKind::detect(&self.parts.method, &self.parts.headers)?;
        let body = if kind.reads_body() {
            self.body_bytes().await?
        } else {
            Bytes::new()
        };
        let input = BindInput {
            kind: &kind,
            query: self.parts.uri.query(),
            body: &body,
            params: &self.params,
        };
        bind::bind(input).await
    }

    // ---- registry ----

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Register `value` under its concrete type.
    pub fn map_value<T: Send + Sync + 'static>(&mut self, value: T) {
        self.registry.map_value(value);
    }

    /// Register `value` under the interface type `I`.
    pub fn map_value_to<I: ?Sized + Send + Sync + 'static>(&mut self, value: Arc<I>) {
        self.registry.map_value_to(value);
    }

    pub fn set_by_type(&mut self, key: TypeKey, value: Box<dyn std::any::Any + Send + Sync>) {
        self.registry.set_by_type(key, value);
    }

    pub fn get<T: 'static>(&self) -> Result<&T, RegistryError> {
        self.registry.get::<T>()
    }

    pub fn get_interface<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<I>, RegistryError> {
        self.registry.get_interface::<I>()
    }

    /// Resolve a value the same way injected handler arguments are resolved.
    pub async fn resolve<T: FromContext>(&mut self) -> Result<T, Rejection> {
        T::from_context(self).await
    }

    // ---- chain ----

    /// Run the remaining handlers. Returns once they have all completed.
    pub fn next(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.index += 1;
            while self.index < ABORT_INDEX && (self.index as usize) < self.handlers.len() {
                let h = self.handlers[self.index as usize].clone();
                h(self).await;
                self.index += 1;
            }
        })
    }

    /// Stop the chain; handlers after the current one are skipped.
    pub fn abort(&mut self) {
        self.index = ABORT_INDEX;
    }

    pub fn is_aborted(&self) -> bool {
        self.index >= ABORT_INDEX
    }

    // ---- response ----

    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut ResponseWriter {
        &mut self.writer
    }

    pub fn status(&self) -> StatusCode {
        self.writer.status()
    }

    pub fn set_status(&mut self, code: StatusCode) {
        self.writer.set_status(code);
    }

    pub fn set_header<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) {
        self.writer.set_header(name, value);
    }

    pub fn attach_error(&mut self, err: impl Into<BoxError>) {
        self.errors.push(err.into());
    }

    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }

    /// Set the status, stop the chain and write `payload`.
    pub async fn reply(&mut self, code: StatusCode, payload: impl Into<Payload>) {
        self.writer.set_status(code);
        self.abort();
        if !reply::body_allowed(code) {
            self.writer.write_header_now().await;
            return;
        }
        self.write_payload(payload.into()).await;
    }

    /// Reply with the JSON error body and record the error.
    pub async fn reply_error(&mut self, code: StatusCode, message: impl Into<String>) {
        let message = message.into();
        let payload = reply::error_payload(&message);
        self.attach_error(reply::HttpError::new(code, message));
        self.reply(code, payload).await;
    }

    /// Reply from a reduced handler result.
    ///
    /// An error is recorded; without an explicit status it answers with the
    /// status of an [`HttpError`](reply::HttpError) or 500. A payload without
    /// status answers 200. With neither, nothing is written.
    pub async fn reply_parts(&mut self, parts: ReplyParts) {
        let ReplyParts {
            mut status,
            mut payload,
            error,
        } = parts;

        if let Some(err) = error {
            if status.is_none() {
                let code = err
                    .downcast_ref::<reply::HttpError>()
                    .map(|e| e.status)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                status = Some(code);
            }
            if payload.is_none() {
                payload = Some(reply::error_payload(&err.to_string()));
            }
            self.errors.push(err);
        }

        match (status, payload) {
            (None, None) => {}
            (Some(code), payload) => self.reply(code, payload.unwrap_or_default()).await,
            (None, Some(payload)) => self.reply(StatusCode::OK, payload).await,
        }
    }

    /// Call `step` until it returns `false` or the client goes away,
    /// flushing after every step.
    pub async fn stream(&mut self, mut step: StreamFn) {
        loop {
            if self.writer.is_closed() {
                return;
            }
            let keep_open = step(&mut self.writer).await;
            if let Err(err) = self.writer.flush().await {
                self.attach_error(err);
                return;
            }
            if !keep_open {
                return;
            }
        }
    }

    /// Write one server-sent event and flush it.
    pub async fn sse_event(&mut self, name: &str, data: impl Into<String>) {
        let event = Event::new(name, data);
        self.write_rendered(event.render(), event.content_type()).await;
        if let Err(err) = self.writer.flush().await {
            self.attach_error(err);
        }
    }

    fn default_content_type(&mut self, content_type: &'static str) {
        if !self.writer.headers().contains_key(header::CONTENT_TYPE) {
            self.writer
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
    }

    async fn write_payload(&mut self, payload: Payload) {
        match payload {
            Payload::Empty => {}
            Payload::Bytes { data, content_type } => {
                self.default_content_type(content_type);
                if let Err(err) = self.writer.write(&data).await {
                    self.attach_error(err);
                }
            }
            Payload::Reader(mut reader) => {
                let mut buf = vec![0u8; READ_CHUNK];
                loop {
                    match reader.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            if let Err(err) = self.writer.write(&buf[..n]).await {
                                self.attach_error(err);
                                break;
                            }
                        }
                        Err(err) => {
                            self.attach_error(err);
                            break;
                        }
                    }
                }
            }
            Payload::Stream(step) => self.stream(step).await,
            Payload::Render(value) => {
                let rendered = value.render();
                self.write_rendered(rendered, value.content_type()).await;
            }
        }
    }

    async fn write_rendered(&mut self, rendered: Result<Bytes, BoxError>, content_type: &'static str) {
        match rendered {
            Ok(bytes) => {
                self.default_content_type(content_type);
                if let Err(err) = self.writer.write(&bytes).await {
                    self.attach_error(err);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to render reply");
                if !self.writer.written() {
                    self.writer.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                }
                self.errors.push(err);
            }
        }
    }
}
