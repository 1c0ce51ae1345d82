//! Handler adapter: plain async functions with injected arguments.
//!
//! # Responsibilities
//! - Resolve each argument of a function from the context
//! - Call the function and reply from its return value
//! - Answer 400 on bind/validation failures and 500 on missing dependencies
//!   without calling the function
//!
//! # Resolution order
//! 1. Built-ins: [`Method`], [`Uri`], [`HeaderMap`], [`Params`], [`RemoteAddr`]
//! 2. The type registry: [`Dep`], [`Iface`], [`RequestId`] and any type
//!    implementing [`FromContext`] on top of it
//! 3. [`Bind`]: the registry first, then the request itself
//!
//! ```ignore
//! async fn create(Dep(db): Dep<Db>, Bind(user): Bind<NewUser>) -> Result<Json<User>, DbError> {
//!     db.insert(user).await.map(Json)
//! }
//! server.post("/users", vec![adapt(create)])?;
//! ```
//!
//! Handlers that need the context itself are written with [`handler`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, Method, StatusCode, Uri};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::bind::BindError;
use super::context::{handler, Context, Handler};
use super::registry::RegistryError;
use super::reply::{error_payload, IntoReplyParts, ReplyParts};
use super::validate::Validate;
use crate::routing::Params;

/// Why an argument could not be resolved.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Missing(#[from] RegistryError),

    #[error("{message}")]
    Status { status: StatusCode, message: String },
}

impl Rejection {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Bind(_) => StatusCode::BAD_REQUEST,
            Self::Missing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Status { status, .. } => *status,
        }
    }

    /// Answer the request with this rejection.
    pub async fn reply(self, ctx: &mut Context) {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(path = ctx.path(), error = %self, "handler argument unavailable");
        } else {
            tracing::debug!(path = ctx.path(), error = %self, "request rejected");
        }
        let payload = error_payload(&self.to_string());
        ctx.reply_parts(ReplyParts {
            status: Some(status),
            payload: Some(payload),
            error: Some(Box::new(self)),
        })
        .await;
    }
}

/// A value resolved from the request context.
pub trait FromContext: Sized + Send + 'static {
    fn from_context<'a>(ctx: &'a mut Context) -> BoxFuture<'a, Result<Self, Rejection>>;
}

impl FromContext for Method {
    fn from_context<'a>(ctx: &'a mut Context) -> BoxFuture<'a, Result<Self, Rejection>> {
        let method = ctx.method().clone();
        Box::pin(async move { Ok(method) })
    }
}

impl FromContext for Uri {
    fn from_context<'a>(ctx: &'a mut Context) -> BoxFuture<'a, Result<Self, Rejection>> {
        let uri = ctx.uri().clone();
        Box::pin(async move { Ok(uri) })
    }
}

impl FromContext for HeaderMap {
    fn from_context<'a>(ctx: &'a mut Context) -> BoxFuture<'a, Result<Self, Rejection>> {
        let headers = ctx.headers().clone();
        Box::pin(async move { Ok(headers) })
    }
}

impl FromContext for Params {
    fn from_context<'a>(ctx: &'a mut Context) -> BoxFuture<'a, Result<Self, Rejection>> {
        let params = ctx.params().clone();
        Box::pin(async move { Ok(params) })
    }
}

/// The peer address, when the transport reported one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub Option<SocketAddr>);

impl FromContext for RemoteAddr {
    fn from_context<'a>(ctx: &'a mut Context) -> BoxFuture<'a, Result<Self, Rejection>> {
        let addr = ctx.remote_addr();
        Box::pin(async move { Ok(RemoteAddr(addr)) })
    }
}

/// Request id registered by the `request_id` middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl FromContext for RequestId {
    fn from_context<'a>(ctx: &'a mut Context) -> BoxFuture<'a, Result<Self, Rejection>> {
        let id = ctx.get::<RequestId>().cloned().map_err(Rejection::from);
        Box::pin(async move { id })
    }
}

/// A value registered under its concrete type.
#[derive(Debug, Clone)]
pub struct Dep<T>(pub T);

impl<T: Clone + Send + Sync + 'static> FromContext for Dep<T> {
    fn from_context<'a>(ctx: &'a mut Context) -> BoxFuture<'a, Result<Self, Rejection>> {
        let value = ctx.get::<T>().cloned().map(Dep).map_err(Rejection::from);
        Box::pin(async move { value })
    }
}

/// A value registered under the interface type `I`.
pub struct Iface<I: ?Sized>(pub Arc<I>);

impl<I: ?Sized + Send + Sync + 'static> FromContext for Iface<I> {
    fn from_context<'a>(ctx: &'a mut Context) -> BoxFuture<'a, Result<Self, Rejection>> {
        let value = ctx.get_interface::<I>().map(Iface).map_err(Rejection::from);
        Box::pin(async move { value })
    }
}

/// A registered `T`, or one decoded and validated from the request.
#[derive(Debug, Clone)]
pub struct Bind<T>(pub T);

impl<T> FromContext for Bind<T>
where
    T: DeserializeOwned + Validate + Clone + Send + Sync + 'static,
{
    fn from_context<'a>(ctx: &'a mut Context) -> BoxFuture<'a, Result<Self, Rejection>> {
        Box::pin(async move {
            if let Ok(value) = ctx.get::<T>() {
                return Ok(Bind(value.clone()));
            }
            ctx.bind::<T>().await.map(Bind).map_err(Rejection::from)
        })
    }
}

/// A function whose arguments can be resolved from a [`Context`].
///
/// Implemented for async functions and closures of up to eight arguments.
pub trait Injectable<Args>: Clone + Send + Sync + 'static {
    type Output;

    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<Self::Output, Rejection>>;
}

macro_rules! impl_injectable {
    ($($arg:ident),*) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, Fut, R, $($arg,)*> Injectable<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: Send + 'static,
            $($arg: FromContext,)*
        {
            type Output = R;

            fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<R, Rejection>> {
                Box::pin(async move {
                    $(let $arg = $arg::from_context(ctx).await?;)*
                    Ok::<R, Rejection>((self)($($arg),*).await)
                })
            }
        }
    };
}

impl_injectable!();
impl_injectable!(A1);
impl_injectable!(A1, A2);
impl_injectable!(A1, A2, A3);
impl_injectable!(A1, A2, A3, A4);
impl_injectable!(A1, A2, A3, A4, A5);
impl_injectable!(A1, A2, A3, A4, A5, A6);
impl_injectable!(A1, A2, A3, A4, A5, A6, A7);
impl_injectable!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Turn an injectable function into a [`Handler`].
///
/// The return value is reduced with [`IntoReplyParts`] and replied.
pub fn adapt<F, Args>(f: F) -> Handler
where
    F: Injectable<Args>,
    F::Output: IntoReplyParts + Send,
    Args: 'static,
{
    handler(move |ctx| {
        let f = f.clone();
        Box::pin(async move {
            let resolved = f.call(ctx).await;
            match resolved {
                Ok(output) => {
                    let parts = output.into_reply_parts();
                    ctx.reply_parts(parts).await;
                }
                Err(rejection) => rejection.reply(ctx).await,
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reply::Json;
    use crate::http::validate::{Rules, ValidationErrors};
    use crate::http::writer::ResponseReceiver;
    use axum::body::Body;
    use axum::http::{header, Request};
    use bytes::Bytes;
    use serde::Deserialize;

    #[derive(Debug, Clone, Deserialize)]
    struct Login {
        user: String,
        #[serde(default)]
        remember: bool,
    }

    impl Validate for Login {
        fn validate(&self) -> Result<(), ValidationErrors> {
            Rules::new().length("user", &self.user, 3, 16).finish()
        }
    }

    trait Greeter: Send + Sync {
        fn greet(&self, name: &str) -> String;
    }

    struct Hello;

    impl Greeter for Hello {
        fn greet(&self, name: &str) -> String {
            format!("hello {name}")
        }
    }

    async fn run(ctx: &mut Context, rx: ResponseReceiver, h: Handler) -> (StatusCode, Bytes) {
        ctx.run(&[], &[h]).await;
        let (head, body) = rx.collect().await.unwrap();
        (head.status, body)
    }

    fn post_json(body: &'static str) -> (Context, ResponseReceiver) {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/login?remember=true")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        Context::for_request(request, None)
    }

    #[tokio::test]
    async fn test_bind_and_reply_json() {
        async fn login(Bind(login): Bind<Login>, method: Method) -> Json<serde_json::Value> {
            Json(serde_json::json!({ "user": login.user, "method": method.as_str() }))
        }

        let (mut ctx, rx) = post_json(r#"{"user": "gopher"}"#);
        let (status, body) = run(&mut ctx, rx, adapt(login)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], br#"{"method":"POST","user":"gopher"}"#);
    }

    #[tokio::test]
    async fn test_validation_failure_skips_handler() {
        let called = Arc::new(parking_lot::Mutex::new(false));
        let flag = called.clone();
        let h = adapt(move |Bind(_): Bind<Login>| {
            let flag = flag.clone();
            async move {
                *flag.lock() = true;
            }
        });

        let (mut ctx, rx) = post_json(r#"{"user": "x"}"#);
        let (status, body) = run(&mut ctx, rx, h).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("user: length"));
        assert!(!*called.lock());
    }

    #[tokio::test]
    async fn test_registered_value_wins_over_binding() {
        let (mut ctx, rx) = post_json("{not json");
        ctx.map_value(Login {
            user: "mapped".into(),
            remember: false,
        });
        let h = adapt(|Bind(login): Bind<Login>| async move { login.user });
        let (status, body) = run(&mut ctx, rx, h).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"mapped");
    }

    #[tokio::test]
    async fn test_dependencies_and_interfaces() {
        let (mut ctx, rx) = post_json("{}");
        ctx.map_value(41u64);
        ctx.map_value_to::<dyn Greeter>(Arc::new(Hello));
        let h = adapt(|Dep(n): Dep<u64>, Iface(g): Iface<dyn Greeter>| async move {
            (StatusCode::ACCEPTED, format!("{} {}", g.greet("bob"), n + 1))
        });
        let (status, body) = run(&mut ctx, rx, h).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(&body[..], b"hello bob 42");
    }

    #[tokio::test]
    async fn test_missing_dependency_is_500() {
        let (mut ctx, rx) = post_json("{}");
        let h = adapt(|Dep(_): Dep<String>| async {});
        let (status, _) = run(&mut ctx, rx, h).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ctx.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_error_result_is_500() {
        let (mut ctx, rx) = post_json("{}");
        let h = adapt(|| async { Err::<String, _>(std::io::Error::other("gone")) });
        let (status, body) = run(&mut ctx, rx, h).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&body[..], br#"{"error":"gone"}"#);
    }

    #[tokio::test]
    async fn test_unit_result_writes_nothing() {
        let (mut ctx, rx) = post_json("{}");
        let h = adapt(|| async {});
        let (status, body) = run(&mut ctx, rx, h).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert!(!ctx.is_aborted());
    }
}
