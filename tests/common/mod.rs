//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use api_engine::http::ApiService;
use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{request, Method, Request};
use axum::response::Response;
use tower::ServiceExt;

pub const USER_AGENT: &str = "api-engine-tests/1.0";

/// Peer address attached to requests built with [`request`].
pub fn client_addr() -> SocketAddr {
    "10.0.0.7:9527".parse().unwrap()
}

/// A request builder carrying a peer address and a User-Agent.
pub fn request(method: Method, uri: &str) -> request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("user-agent", USER_AGENT)
        .extension(ConnectInfo(client_addr()))
}

pub fn get(uri: &str) -> Request<Body> {
    request(Method::GET, uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    request(Method::POST, uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(service: &ApiService, req: Request<Body>) -> Response {
    service.clone().oneshot(req).await.unwrap()
}

pub async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn header(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .map(|v| v.to_str().unwrap().to_string())
}

/// Every `Set-Cookie` line of a response.
pub fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// The `name=value` part of the `Set-Cookie` line for `name`.
pub fn cookie_pair(lines: &[String], name: &str) -> Option<String> {
    lines
        .iter()
        .map(|line| line.split(';').next().unwrap_or_default().trim().to_string())
        .find(|pair| pair.starts_with(&format!("{name}=")))
}

/// Add a `Cookie` header made of `pairs`.
pub fn with_cookies(mut req: Request<Body>, pairs: &[String]) -> Request<Body> {
    let value = pairs.join("; ");
    req.headers_mut().insert(COOKIE, value.parse().unwrap());
    req
}
