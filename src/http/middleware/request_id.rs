//! Request id propagation.

use axum::http::HeaderValue;
use uuid::Uuid;

use crate::http::context::{handler, Handler};
use crate::http::inject::RequestId;

pub const X_REQUEST_ID: &str = "x-request-id";

const MAX_INCOMING_ID_LEN: usize = 128;

/// Reuse the caller's `x-request-id` or mint a UUID v4; register it as
/// [`RequestId`] and echo it on the response.
pub fn request_id() -> Handler {
    handler(|ctx| {
        Box::pin(async move {
            let incoming = ctx
                .header(X_REQUEST_ID)
                .filter(|id| !id.is_empty() && id.len() <= MAX_INCOMING_ID_LEN)
                .map(str::to_string);
            let id = incoming.unwrap_or_else(|| Uuid::new_v4().to_string());

            if let Ok(value) = HeaderValue::from_str(&id) {
                ctx.set_header(X_REQUEST_ID, value);
            }
            ctx.map_value(RequestId(id));
            ctx.next().await;
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::context::Context;
    use axum::body::Body;
    use axum::http::Request;

    #[tokio::test]
    async fn test_generates_and_registers_id() {
        let (mut ctx, rx) = Context::for_request(Request::new(Body::empty()), None);
        ctx.run(&[request_id()], &[]).await;

        let registered = ctx.get::<RequestId>().unwrap().0.clone();
        assert!(Uuid::parse_str(&registered).is_ok());
        let (head, _) = rx.collect().await.unwrap();
        assert_eq!(head.headers[X_REQUEST_ID], registered.as_str());
    }

    #[tokio::test]
    async fn test_reuses_incoming_id() {
        let request = Request::builder()
            .header(X_REQUEST_ID, "abc-123")
            .body(Body::empty())
            .unwrap();
        let (mut ctx, _rx) = Context::for_request(request, None);
        ctx.run(&[request_id()], &[]).await;
        assert_eq!(ctx.get::<RequestId>().unwrap().0, "abc-123");
    }
}
