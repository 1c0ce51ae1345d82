//! Request binding: body + query + route params into a typed value.
//!
//! # Responsibilities
//! - Pick a decoder from the method and the declared content type
//! - Merge route params into the decoded data (params win)
//! - Run the target's declarative constraints
//!
//! # Design Decisions
//! - GET and DELETE always bind the query string as a form
//! - Form-like inputs are merged as text pairs and decoded in one pass, so
//!   numbers and booleans parse from their text form
//! - JSON/XML bodies are decoded to a JSON object first; params are
//!   overlaid as strings and, if that fails, with scalar inference
//! - Defaults come from `#[serde(default)]` on the target type

use axum::http::{header, HeaderMap, Method};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use super::validate::{Validate, ValidationErrors};
use crate::routing::Params;

#[derive(Debug, Error)]
pub enum BindError {
    #[error("unsupported content type '{0}'")]
    UnsupportedContentType(String),

    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Read(String),

    #[error("invalid form data: {0}")]
    Form(String),

    #[error("invalid json: {0}")]
    Json(String),

    #[error("invalid xml: {0}")]
    Xml(String),

    #[error("invalid multipart data: {0}")]
    Multipart(String),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),
}

/// Decoder selected for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyKind {
    /// URL query only (GET and DELETE).
    Query,
    Form,
    Json,
    Xml,
    Multipart { boundary: String },
}

impl BodyKind {
    pub fn detect(method: &Method, headers: &HeaderMap) -> Result<Self, BindError> {
        if method == Method::GET || method == Method::DELETE {
            return Ok(Self::Query);
        }

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/json" => Ok(Self::Json),
            "application/xml" | "text/xml" => Ok(Self::Xml),
            "application/x-www-form-urlencoded" => Ok(Self::Form),
            "multipart/form-data" => multer::parse_boundary(content_type)
                .map(|boundary| Self::Multipart { boundary })
                .map_err(|e| BindError::Multipart(e.to_string())),
            other => Err(BindError::UnsupportedContentType(other.to_string())),
        }
    }

    pub fn reads_body(&self) -> bool {
        !matches!(self, Self::Query)
    }
}

/// Everything the binder looks at.
#[derive(Debug, Clone, Copy)]
pub struct BindInput<'a> {
    pub kind: &'a BodyKind,
    pub query: Option<&'a str>,
    pub body: &'a [u8],
    pub params: &'a Params,
}

/// Decode and validate a `T` from `input`.
pub async fn bind<T>(input: BindInput<'_>) -> Result<T, BindError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = decode(input).await?;
    value.validate()?;
    Ok(value)
}

/// Decode a `T` from `input` without validation.
pub async fn decode<T: DeserializeOwned>(input: BindInput<'_>) -> Result<T, BindError> {
    match input.kind {
        BodyKind::Query => {
            let pairs = merge_pairs(query_pairs(input.query)?, Vec::new(), input.params);
            decode_pairs(&pairs)
        }
        BodyKind::Form => {
            let body = parse_pairs(input.body)?;
            let pairs = merge_pairs(query_pairs(input.query)?, body, input.params);
            decode_pairs(&pairs)
        }
        BodyKind::Multipart { boundary } => {
            let body = multipart_pairs(input.body, boundary).await?;
            let pairs = merge_pairs(query_pairs(input.query)?, body, input.params);
            decode_pairs(&pairs)
        }
        BodyKind::Json => {
            let value = if input.body.iter().all(u8::is_ascii_whitespace) {
                Value::Object(Map::new())
            } else {
                serde_json::from_slice(input.body).map_err(|e| BindError::Json(e.to_string()))?
            };
            decode_value(value, input.params).map_err(BindError::Json)
        }
        BodyKind::Xml => {
            let text = std::str::from_utf8(input.body).map_err(|e| BindError::Xml(e.to_string()))?;
            if input.params.is_empty() {
                return quick_xml::de::from_str(text).map_err(|e| BindError::Xml(e.to_string()));
            }
            let value: Value =
                quick_xml::de::from_str(text).map_err(|e| BindError::Xml(e.to_string()))?;
            decode_value(value, input.params).map_err(BindError::Xml)
        }
    }
}

fn query_pairs(query: Option<&str>) -> Result<Vec<(String, String)>, BindError> {
    match query {
        Some(q) if !q.is_empty() => parse_pairs(q.as_bytes()),
        _ => Ok(Vec::new()),
    }
}

fn parse_pairs(raw: &[u8]) -> Result<Vec<(String, String)>, BindError> {
    serde_urlencoded::from_bytes(raw).map_err(|e| BindError::Form(e.to_string()))
}

/// First occurrence of a key wins among query and body; params replace both.
fn merge_pairs(
    query: Vec<(String, String)>,
    body: Vec<(String, String)>,
    params: &Params,
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = Vec::with_capacity(query.len() + body.len() + params.len());
    for (key, value) in query.into_iter().chain(body) {
        if params.get(&key).is_none() && !merged.iter().any(|(k, _)| *k == key) {
            merged.push((key, value));
        }
    }
    for param in params {
        merged.push((param.key.clone(), param.value.clone()));
    }
    merged
}

fn decode_pairs<T: DeserializeOwned>(pairs: &[(String, String)]) -> Result<T, BindError> {
    let encoded = serde_urlencoded::to_string(pairs).map_err(|e| BindError::Form(e.to_string()))?;
    serde_urlencoded::from_str(&encoded).map_err(|e| BindError::Form(e.to_string()))
}

async fn multipart_pairs(body: &[u8], boundary: &str) -> Result<Vec<(String, String)>, BindError> {
    let data = Bytes::copy_from_slice(body);
    let stream = futures_util::stream::once(async move { Ok::<Bytes, std::io::Error>(data) });
    let mut multipart = multer::Multipart::new(stream, boundary.to_string());

    let mut pairs = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BindError::Multipart(e.to_string()))?
    {
        if field.file_name().is_some() {
            continue;
        }
        let name = match field.name() {
            Some(name) => name.to_string(),
            None => continue,
        };
        let text = field
            .text()
            .await
            .map_err(|e| BindError::Multipart(e.to_string()))?;
        pairs.push((name, text));
    }
    Ok(pairs)
}

fn decode_value<T: DeserializeOwned>(value: Value, params: &Params) -> Result<T, String> {
    let Value::Object(mut object) = value else {
        return serde_json::from_value(value).map_err(|e| e.to_string());
    };
    if params.is_empty() {
        return serde_json::from_value(Value::Object(object)).map_err(|e| e.to_string());
    }

    for param in params {
        object.insert(param.key.clone(), Value::String(param.value.clone()));
    }
    let first = match serde_json::from_value(Value::Object(object.clone())) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    for param in params {
        object.insert(param.key.clone(), infer_scalar(&param.value));
    }
    serde_json::from_value(Value::Object(object)).map_err(|_| first.to_string())
}

/// `"42"` → 42, `"1.5"` → 1.5, `"true"` → true, anything else stays text.
fn infer_scalar(text: &str) -> Value {
    if let Ok(n) = text.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(n) = text.parse::<u64>() {
        return Value::from(n);
    }
    if let Ok(f) = text.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(text.to_string()),
    }
}
