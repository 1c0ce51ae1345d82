//! Reply payloads and handler return values.
//!
//! # Responsibilities
//! - Describe what a handler wants to send ([`Payload`])
//! - Render structured values (JSON, XML, server-sent events)
//! - Reduce handler return values to `(status?, payload?, error?)`
//!
//! # Design Decisions
//! - Strings and bytes are written raw; anything structured goes through [`Render`]
//! - A stream step returns `true` to keep the response open
//! - Errors carry their status through [`HttpError`]; any other error is a 500

use axum::http::StatusCode;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::io::AsyncRead;

use super::writer::{BoxError, ResponseWriter};

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const OCTET_STREAM: &str = "application/octet-stream";
pub const APPLICATION_JSON: &str = "application/json; charset=utf-8";
pub const APPLICATION_XML: &str = "application/xml; charset=utf-8";
pub const EVENT_STREAM: &str = "text/event-stream";

/// A value that knows its media type and byte form.
pub trait Render: Send {
    fn content_type(&self) -> &'static str;

    fn render(&self) -> Result<Bytes, BoxError>;
}

/// JSON-encoded payload.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: Serialize + Send> Render for Json<T> {
    fn content_type(&self) -> &'static str {
        APPLICATION_JSON
    }

    fn render(&self) -> Result<Bytes, BoxError> {
        Ok(Bytes::from(serde_json::to_vec(&self.0)?))
    }
}

/// XML-encoded payload.
#[derive(Debug, Clone)]
pub struct Xml<T>(pub T);

impl<T: Serialize + Send> Render for Xml<T> {
    fn content_type(&self) -> &'static str {
        APPLICATION_XML
    }

    fn render(&self) -> Result<Bytes, BoxError> {
        Ok(Bytes::from(quick_xml::se::to_string(&self.0)?))
    }
}

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub data: String,
}

impl Event {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// An event whose data is the JSON encoding of `value`.
    pub fn json<T: Serialize>(name: impl Into<String>, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(name, serde_json::to_string(value)?))
    }
}

impl Render for Event {
    fn content_type(&self) -> &'static str {
        EVENT_STREAM
    }

    fn render(&self) -> Result<Bytes, BoxError> {
        let mut out = String::with_capacity(self.name.len() + self.data.len() + 16);
        if !self.name.is_empty() {
            out.push_str("event: ");
            out.push_str(&self.name);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        Ok(Bytes::from(out))
    }
}

/// One step of a streaming reply. Returns `true` to keep streaming.
pub type StreamFn = Box<dyn for<'a> FnMut(&'a mut ResponseWriter) -> BoxFuture<'a, bool> + Send>;

/// Build a [`StreamFn`] from a closure.
pub fn stream_fn<F>(f: F) -> StreamFn
where
    F: for<'a> FnMut(&'a mut ResponseWriter) -> BoxFuture<'a, bool> + Send + 'static,
{
    Box::new(f)
}

/// A body copied from an async reader.
pub struct Reader(pub Box<dyn AsyncRead + Send + Unpin>);

impl Reader {
    pub fn new<R: AsyncRead + Send + Unpin + 'static>(reader: R) -> Self {
        Self(Box::new(reader))
    }
}

/// What a reply writes after the status.
#[derive(Default)]
pub enum Payload {
    #[default]
    Empty,
    Bytes {
        data: Bytes,
        content_type: &'static str,
    },
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    Stream(StreamFn),
    Render(Box<dyn Render>),
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes { data, content_type } => f
                .debug_struct("Bytes")
                .field("len", &data.len())
                .field("content_type", content_type)
                .finish(),
            Self::Reader(_) => f.write_str("Reader"),
            Self::Stream(_) => f.write_str("Stream"),
            Self::Render(r) => write!(f, "Render({})", r.content_type()),
        }
    }
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn render<R: Render + 'static>(value: R) -> Self {
        Self::Render(Box::new(value))
    }
}

/// The JSON error body `{"error": message}`.
pub fn error_payload(message: &str) -> Payload {
    Payload::render(Json(serde_json::json!({ "error": message })))
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

impl From<&'static str> for Payload {
    fn from(s: &'static str) -> Self {
        Self::Bytes {
            data: Bytes::from_static(s.as_bytes()),
            content_type: TEXT_PLAIN,
        }
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Bytes {
            data: Bytes::from(s),
            content_type: TEXT_PLAIN,
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes {
            data: Bytes::from(v),
            content_type: OCTET_STREAM,
        }
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Self::Bytes {
            data,
            content_type: OCTET_STREAM,
        }
    }
}

impl From<Reader> for Payload {
    fn from(r: Reader) -> Self {
        Self::Reader(r.0)
    }
}

impl From<StreamFn> for Payload {
    fn from(step: StreamFn) -> Self {
        Self::Stream(step)
    }
}

impl<T: Serialize + Send + 'static> From<Json<T>> for Payload {
    fn from(v: Json<T>) -> Self {
        Self::render(v)
    }
}

impl<T: Serialize + Send + 'static> From<Xml<T>> for Payload {
    fn from(v: Xml<T>) -> Self {
        Self::render(v)
    }
}

impl From<Event> for Payload {
    fn from(v: Event) -> Self {
        Self::render(v)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Self::render(Json(v))
    }
}

/// An error with an explicit status, usable as a return value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

/// A handler result reduced to its parts. Every part is optional.
#[derive(Debug, Default)]
pub struct ReplyParts {
    pub status: Option<StatusCode>,
    pub payload: Option<Payload>,
    pub error: Option<BoxError>,
}

impl ReplyParts {
    pub fn status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn payload(payload: impl Into<Payload>) -> Self {
        Self {
            payload: Some(payload.into()),
            ..Self::default()
        }
    }

    pub fn error(error: impl Into<BoxError>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Conversion of handler return values.
pub trait IntoReplyParts {
    fn into_reply_parts(self) -> ReplyParts;
}

impl IntoReplyParts for ReplyParts {
    fn into_reply_parts(self) -> ReplyParts {
        self
    }
}

impl IntoReplyParts for () {
    fn into_reply_parts(self) -> ReplyParts {
        ReplyParts::default()
    }
}

impl IntoReplyParts for StatusCode {
    fn into_reply_parts(self) -> ReplyParts {
        ReplyParts::status(self)
    }
}

impl IntoReplyParts for u16 {
    fn into_reply_parts(self) -> ReplyParts {
        match StatusCode::from_u16(self) {
            Ok(code) => ReplyParts::status(code),
            Err(err) => ReplyParts::error(err),
        }
    }
}

macro_rules! payload_reply {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReplyParts for $ty {
                fn into_reply_parts(self) -> ReplyParts {
                    ReplyParts::payload(self)
                }
            }
        )*
    };
}

payload_reply!(
    &'static str,
    String,
    Vec<u8>,
    Bytes,
    Reader,
    StreamFn,
    Event,
    serde_json::Value,
    Payload,
);

impl<T: Serialize + Send + 'static> IntoReplyParts for Json<T> {
    fn into_reply_parts(self) -> ReplyParts {
        ReplyParts::payload(self)
    }
}

impl<T: Serialize + Send + 'static> IntoReplyParts for Xml<T> {
    fn into_reply_parts(self) -> ReplyParts {
        ReplyParts::payload(self)
    }
}

impl<P: Into<Payload>> IntoReplyParts for (StatusCode, P) {
    fn into_reply_parts(self) -> ReplyParts {
        ReplyParts {
            status: Some(self.0),
            payload: Some(self.1.into()),
            error: None,
        }
    }
}

impl IntoReplyParts for HttpError {
    fn into_reply_parts(self) -> ReplyParts {
        ReplyParts {
            status: Some(self.status),
            payload: Some(error_payload(&self.message)),
            error: Some(Box::new(self)),
        }
    }
}

impl<R: IntoReplyParts> IntoReplyParts for Option<R> {
    fn into_reply_parts(self) -> ReplyParts {
        match self {
            Some(r) => r.into_reply_parts(),
            None => ReplyParts::default(),
        }
    }
}

impl<R, E> IntoReplyParts for Result<R, E>
where
    R: IntoReplyParts,
    E: Into<BoxError>,
{
    fn into_reply_parts(self) -> ReplyParts {
        match self {
            Ok(r) => r.into_reply_parts(),
            Err(e) => ReplyParts::error(e),
        }
    }
}

/// Statuses that must not carry a body.
pub fn body_allowed(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Greeting {
        text: String,
    }

    #[test]
    fn test_event_render() {
        let bytes = Event::new("tick", "a\nb").render().unwrap();
        assert_eq!(&bytes[..], b"event: tick\ndata: a\ndata: b\n\n");

        let anonymous = Event::new("", "x").render().unwrap();
        assert_eq!(&anonymous[..], b"data: x\n\n");
    }

    #[test]
    fn test_json_and_xml_render() {
        let value = Greeting { text: "hi".into() };
        assert_eq!(&Json(&value).render().unwrap()[..], br#"{"text":"hi"}"#);
        assert_eq!(
            &Xml(&value).render().unwrap()[..],
            b"<Greeting><text>hi</text></Greeting>"
        );
    }

    #[test]
    fn test_reply_parts_reduction() {
        let parts = (StatusCode::CREATED, "made").into_reply_parts();
        assert_eq!(parts.status, Some(StatusCode::CREATED));
        assert!(matches!(parts.payload, Some(Payload::Bytes { content_type: TEXT_PLAIN, .. })));

        let parts = Ok::<_, std::io::Error>(Json(1)).into_reply_parts();
        assert!(parts.status.is_none());
        assert!(parts.payload.is_some());

        let parts = Err::<(), _>("boom").into_reply_parts();
        assert_eq!(parts.error.unwrap().to_string(), "boom");

        let parts = HttpError::bad_request("nope").into_reply_parts();
        assert_eq!(parts.status, Some(StatusCode::BAD_REQUEST));
        assert!(parts.error.is_some());

        let parts = None::<String>.into_reply_parts();
        assert!(parts.status.is_none() && parts.payload.is_none() && parts.error.is_none());
    }

    #[test]
    fn test_body_allowed() {
        assert!(!body_allowed(StatusCode::CONTINUE));
        assert!(!body_allowed(StatusCode::NO_CONTENT));
        assert!(!body_allowed(StatusCode::NOT_MODIFIED));
        assert!(body_allowed(StatusCode::OK));
        assert!(body_allowed(StatusCode::NOT_FOUND));
    }
}
