//! Route registration and request dispatch.
//!
//! # Responsibilities
//! - Build the per-method routing trees and the global middleware list
//! - Dispatch each request: route chain, redirect, 405 or 404
//! - Pool contexts across requests
//! - Serve the application over Axum/hyper with graceful shutdown
//!
//! # Data Flow
//! ```text
//! hyper ─▶ TraceLayer ─▶ ApiService::call
//!                            │ acquire Context from pool, reset
//!                            ▼
//!                     spawn(dispatch) ──▶ middleware ++ route chain
//!                            │                     │
//!          Response ◀─ head + body channel ◀───────┘
//! ```
//!
//! # Design Decisions
//! - Trees are built before serving and read-only afterwards (no lock)
//! - Global middleware also runs ahead of the 404 and 405 chains
//! - Redirects skip middleware: 301 for GET, 307 for everything else
//! - Every handler runs on its own task; if it dies before writing a head
//!   the client gets a 500

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use hyper::upgrade::OnUpgrade;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::context::{handler, Context, Handler, ABORT_INDEX, DEFAULT_MAX_BODY_BYTES};
use super::static_files::{self, FILEPATH_PARAM};
use crate::config::schema::RouterConfig;
use crate::lifecycle::Shutdown;
use crate::routing::{clean_path, Node, RouteError, Trees};

/// A registered handler chain.
pub type Chain = Arc<[Handler]>;

/// Methods covered by [`Server::any`].
pub const ANY_METHODS: [Method; 9] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
    Method::CONNECT,
    Method::TRACE,
];

const CONTEXT_POOL_LIMIT: usize = 1024;

/// One registered route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: Method,
    pub pattern: String,
    pub handlers: usize,
}

/// Routes keyed by `"METHOD:/pattern"`, registered in bulk with
/// [`Server::add_routes`]. `ANY` registers every method.
#[derive(Default)]
pub struct RouteTable {
    entries: Vec<(String, Vec<Handler>)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, key: impl Into<String>, handlers: Vec<Handler>) -> Self {
        self.entries.push((key.into(), handlers));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn default_chain(status: StatusCode, body: &'static str) -> Chain {
    Arc::from(vec![handler(move |ctx| {
        Box::pin(async move { ctx.reply(status, body).await })
    })])
}

/// The application: routes, middleware and fallback handlers.
pub struct Server {
    trees: Trees<Chain>,
    middleware: Vec<Handler>,
    not_found: Chain,
    method_not_allowed: Chain,
    redirect_trailing_slash: bool,
    redirect_fixed_path: bool,
    handle_method_not_allowed: bool,
    max_body_bytes: usize,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            trees: Trees::new(),
            middleware: Vec::new(),
            not_found: default_chain(StatusCode::NOT_FOUND, "404 page not found"),
            method_not_allowed: default_chain(StatusCode::METHOD_NOT_ALLOWED, "405 method not allowed"),
            redirect_trailing_slash: true,
            redirect_fixed_path: false,
            handle_method_not_allowed: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn from_config(config: &RouterConfig) -> Self {
        let mut server = Self::new();
        server.redirect_trailing_slash = config.redirect_trailing_slash;
        server.redirect_fixed_path = config.redirect_fixed_path;
        server.handle_method_not_allowed = config.handle_method_not_allowed;
        server.max_body_bytes = config.max_body_bytes;
        server
    }

    pub fn redirect_trailing_slash(&mut self, enabled: bool) -> &mut Self {
        self.redirect_trailing_slash = enabled;
        self
    }

    pub fn redirect_fixed_path(&mut self, enabled: bool) -> &mut Self {
        self.redirect_fixed_path = enabled;
        self
    }

    pub fn handle_method_not_allowed(&mut self, enabled: bool) -> &mut Self {
        self.handle_method_not_allowed = enabled;
        self
    }

    pub fn max_body_bytes(&mut self, limit: usize) -> &mut Self {
        self.max_body_bytes = limit;
        self
    }

    /// Append global middleware. It runs ahead of every chain, including
    /// the 404 and 405 chains.
    pub fn use_middleware(&mut self, handlers: impl IntoIterator<Item = Handler>) -> &mut Self {
        self.middleware.extend(handlers);
        self
    }

    pub fn not_found(&mut self, handlers: Vec<Handler>) -> &mut Self {
        if !handlers.is_empty() {
            self.not_found = Arc::from(handlers);
        }
        self
    }

    pub fn method_not_allowed(&mut self, handlers: Vec<Handler>) -> &mut Self {
        if !handlers.is_empty() {
            self.method_not_allowed = Arc::from(handlers);
        }
        self
    }

    /// Register `handlers` for `method` + `pattern`.
    pub fn handle(&mut self, method: Method, pattern: &str, handlers: Vec<Handler>) -> Result<(), RouteError> {
        self.check_chain(pattern, handlers.len())?;
        self.trees.add(&method, pattern, Arc::from(handlers))?;
        tracing::debug!(method = %method, pattern, "route registered");
        Ok(())
    }

    fn check_chain(&self, pattern: &str, len: usize) -> Result<(), RouteError> {
        if !pattern.starts_with('/') {
            return Err(RouteError::MissingLeadingSlash {
                pattern: pattern.to_string(),
            });
        }
        if len == 0 {
            return Err(RouteError::EmptyChain {
                pattern: pattern.to_string(),
            });
        }
        let count = self.middleware.len() + len;
        let limit = ABORT_INDEX as usize - 1;
        if count > limit {
            return Err(RouteError::TooManyHandlers {
                pattern: pattern.to_string(),
                count,
                limit,
            });
        }
        Ok(())
    }

    pub fn get(&mut self, pattern: &str, handlers: Vec<Handler>) -> Result<(), RouteError> {
        self.handle(Method::GET, pattern, handlers)
    }

    pub fn head(&mut self, pattern: &str, handlers: Vec<Handler>) -> Result<(), RouteError> {
        self.handle(Method::HEAD, pattern, handlers)
    }

    pub fn post(&mut self, pattern: &str, handlers: Vec<Handler>) -> Result<(), RouteError> {
        self.handle(Method::POST, pattern, handlers)
    }

    pub fn put(&mut self, pattern: &str, handlers: Vec<Handler>) -> Result<(), RouteError> {
        self.handle(Method::PUT, pattern, handlers)
    }

    pub fn patch(&mut self, pattern: &str, handlers: Vec<Handler>) -> Result<(), RouteError> {
        self.handle(Method::PATCH, pattern, handlers)
    }

    pub fn delete(&mut self, pattern: &str, handlers: Vec<Handler>) -> Result<(), RouteError> {
        self.handle(Method::DELETE, pattern, handlers)
    }

    pub fn options(&mut self, pattern: &str, handlers: Vec<Handler>) -> Result<(), RouteError> {
        self.handle(Method::OPTIONS, pattern, handlers)
    }

    pub fn connect(&mut self, pattern: &str, handlers: Vec<Handler>) -> Result<(), RouteError> {
        self.handle(Method::CONNECT, pattern, handlers)
    }

    pub fn trace(&mut self, pattern: &str, handlers: Vec<Handler>) -> Result<(), RouteError> {
        self.handle(Method::TRACE, pattern, handlers)
    }

    /// Register `handlers` for every method in [`ANY_METHODS`].
    ///
    /// All or nothing: if one method fails, no method keeps the route. A
    /// later method-specific registration of the same pattern is a
    /// duplicate.
    pub fn any(&mut self, pattern: &str, handlers: Vec<Handler>) -> Result<(), RouteError> {
        self.check_chain(pattern, handlers.len())?;
        let chain: Chain = Arc::from(handlers);
        let snapshot = self.trees.clone();
        for method in ANY_METHODS.iter() {
            if let Err(err) = self.trees.add(method, pattern, chain.clone()) {
                self.trees = snapshot;
                return Err(err);
            }
        }
        tracing::debug!(method = "ANY", pattern, "route registered");
        Ok(())
    }

    /// Register every entry of `table`.
    pub fn add_routes(&mut self, table: RouteTable) -> Result<(), RouteError> {
        for (key, handlers) in table.entries {
            let (method, pattern) = match key.split_once(':') {
                Some((method, pattern)) => (method.trim().to_ascii_uppercase(), pattern.trim()),
                None => return Err(RouteError::UnknownMethod { method: key.clone() }),
            };
            if method == "ANY" {
                self.any(pattern, handlers)?;
                continue;
            }
            let method = ANY_METHODS
                .iter()
                .find(|m| m.as_str() == method)
                .cloned()
                .ok_or(RouteError::UnknownMethod { method })?;
            self.handle(method, pattern, handlers)?;
        }
        Ok(())
    }

    /// Serve the files below `root` under `prefix` (GET and HEAD).
    pub fn static_dir(&mut self, prefix: &str, root: impl Into<PathBuf>) -> Result<(), RouteError> {
        if prefix.contains(':') || prefix.contains('*') {
            return Err(RouteError::WildcardInStatic {
                pattern: prefix.to_string(),
            });
        }
        let pattern = format!("{}/*{FILEPATH_PARAM}", prefix.trim_end_matches('/'));
        let serve = static_files::serve_dir(root);
        self.get(&pattern, vec![serve.clone()])?;
        self.head(&pattern, vec![serve])
    }

    /// Serve the file at `path` under `url` (GET and HEAD).
    pub fn static_file(&mut self, url: &str, path: impl Into<PathBuf>) -> Result<(), RouteError> {
        if url.contains(':') || url.contains('*') {
            return Err(RouteError::WildcardInStatic {
                pattern: url.to_string(),
            });
        }
        let serve = static_files::serve_file(path);
        self.get(url, vec![serve.clone()])?;
        self.head(url, vec![serve])
    }

    /// Every registered route, grouped by method in registration order.
    pub fn routes(&self) -> Vec<RouteInfo> {
        let mut routes = Vec::new();
        for (method, root) in self.trees.iter() {
            root.walk(&mut |pattern, chain| {
                routes.push(RouteInfo {
                    method: method.clone(),
                    pattern: pattern.to_string(),
                    handlers: chain.len(),
                });
            });
        }
        routes
    }

    /// Methods, other than `method`, that have a route for `path`.
    pub fn allowed_methods(&self, method: &Method, path: &str) -> Vec<Method> {
        self.trees
            .iter()
            .filter(|(m, _)| *m != method && **m != Method::OPTIONS)
            .filter(|(_, root)| root.get_value(path, None).value.is_some())
            .map(|(m, _)| m.clone())
            .collect()
    }

    /// Route `ctx` and run the resulting chain to completion.
    pub async fn dispatch(&self, ctx: &mut Context) {
        let method = ctx.method().clone();
        let path = ctx.path().to_string();

        if let Some(root) = self.trees.get(&method) {
            let lookup = root.get_value(&path, Some(ctx.params_mut()));
            if let Some(chain) = lookup.value {
                let chain = chain.clone();
                ctx.run(&self.middleware, &chain).await;
                return;
            }
            let tsr = lookup.tsr;
            ctx.params_mut().clear();

            if method != Method::CONNECT && path != "/" {
                if let Some(target) = self.redirect_target(root, &path, tsr) {
                    self.redirect(ctx, &method, target).await;
                    return;
                }
            }
        }

        if self.handle_method_not_allowed {
            let allowed = self.allowed_methods(&method, &path);
            if !allowed.is_empty() {
                let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    ctx.set_header(header::ALLOW, value);
                }
                let chain = self.method_not_allowed.clone();
                ctx.run(&self.middleware, &chain).await;
                return;
            }
        }

        let chain = self.not_found.clone();
        ctx.run(&self.middleware, &chain).await;
    }

    fn redirect_target(&self, root: &Node<Chain>, path: &str, tsr: bool) -> Option<String> {
        if tsr && self.redirect_trailing_slash {
            let target = match path.strip_suffix('/') {
                Some(stripped) if !stripped.is_empty() => stripped.to_string(),
                _ => format!("{path}/"),
            };
            return Some(target);
        }
        if self.redirect_fixed_path {
            return root.find_case_insensitive_path(&clean_path(path), self.redirect_trailing_slash);
        }
        None
    }

    async fn redirect(&self, ctx: &mut Context, method: &Method, target: String) {
        let status = if *method == Method::GET {
            StatusCode::MOVED_PERMANENTLY
        } else {
            StatusCode::TEMPORARY_REDIRECT
        };
        let location = match ctx.query() {
            Some(query) => format!("{target}?{query}"),
            None => target,
        };
        tracing::debug!(from = ctx.path(), to = %location, status = status.as_u16(), "redirecting");

        match HeaderValue::from_str(&location) {
            Ok(value) => {
                ctx.set_header(header::LOCATION, value);
                ctx.set_status(status);
            }
            Err(_) => ctx.set_status(StatusCode::BAD_REQUEST),
        }
        ctx.run(&[], &[]).await;
    }

    /// Freeze the routing table into a transport service.
    pub fn into_service(self) -> ApiService {
        let max_params = self.trees.max_params();
        ApiService {
            shared: Arc::new(Shared {
                server: self,
                pool: Mutex::new(Vec::new()),
                max_params,
            }),
        }
    }
}

struct Shared {
    server: Server,
    pool: Mutex<Vec<Context>>,
    max_params: usize,
}

impl Shared {
    fn acquire(&self) -> Context {
        self.pool
            .lock()
            .pop()
            .unwrap_or_else(|| Context::new(self.max_params))
    }

    fn release(&self, mut ctx: Context) {
        ctx.recycle();
        let mut pool = self.pool.lock();
        if pool.len() < CONTEXT_POOL_LIMIT {
            pool.push(ctx);
        }
    }
}

/// The `tower::Service` entry point for a frozen [`Server`].
#[derive(Clone)]
pub struct ApiService {
    shared: Arc<Shared>,
}

impl ApiService {
    pub fn server(&self) -> &Server {
        &self.shared.server
    }

    /// Number of idle pooled contexts.
    pub fn pooled_contexts(&self) -> usize {
        self.shared.pool.lock().len()
    }

    async fn serve_request(shared: Arc<Shared>, request: Request<Body>) -> Response {
        let (mut parts, body) = request.into_parts();
        let upgrade = parts.extensions.remove::<OnUpgrade>();
        let remote = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);

        let mut ctx = shared.acquire();
        let rx = ctx.reset(parts, body, remote, upgrade, shared.server.max_body_bytes);

        let task_shared = shared.clone();
        tokio::spawn(async move {
            task_shared.server.dispatch(&mut ctx).await;
            for err in ctx.errors() {
                tracing::debug!(path = ctx.path(), error = %err, "request error");
            }
            task_shared.release(ctx);
        });

        rx.into_response().await
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = axum::Router::new()
            .fallback_service(self)
            .layer(TraceLayer::new_for_http())
            .into_make_service_with_connect_info::<SocketAddr>();

        let shutdown = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

impl tower::Service<Request<Body>> for ApiService {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let shared = self.shared.clone();
        Box::pin(async move { Ok(Self::serve_request(shared, request).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reply::Json;
    use tower::ServiceExt;

    fn text(body: &'static str) -> Handler {
        handler(move |ctx| Box::pin(async move { ctx.reply(StatusCode::OK, body).await }))
    }

    async fn call(service: &ApiService, method: Method, uri: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        service.clone().oneshot(request).await.unwrap()
    }

    #[test]
    fn test_registration_errors() {
        let mut server = Server::new();
        assert!(matches!(
            server.get("nope", vec![text("x")]),
            Err(RouteError::MissingLeadingSlash { .. })
        ));
        assert!(matches!(server.get("/x", vec![]), Err(RouteError::EmptyChain { .. })));

        let long = (0..ABORT_INDEX).map(|_| text("x")).collect();
        assert!(matches!(
            server.get("/long", long),
            Err(RouteError::TooManyHandlers { .. })
        ));
        assert!(matches!(
            server.static_dir("/files/:id", "."),
            Err(RouteError::WildcardInStatic { .. })
        ));
    }

    #[test]
    fn test_any_then_specific_is_duplicate() {
        let mut server = Server::new();
        server.any("/hook", vec![text("any")]).unwrap();
        assert_eq!(server.routes().len(), ANY_METHODS.len());
        assert!(matches!(
            server.post("/hook", vec![text("post")]),
            Err(RouteError::DuplicateRoute { .. })
        ));

        // A failed ANY leaves no method behind.
        server.get("/only-get", vec![text("get")]).unwrap();
        assert!(server.any("/only-get", vec![text("any")]).is_err());
        let count = server.routes().iter().filter(|r| r.pattern == "/only-get").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_route_table() {
        let mut server = Server::new();
        let table = RouteTable::new()
            .add("POST:/api/login", vec![text("login")])
            .add("get:/api/me", vec![text("me"), text("unused")]);
        server.add_routes(table).unwrap();

        let routes = server.routes();
        assert!(routes.contains(&RouteInfo {
            method: Method::POST,
            pattern: "/api/login".into(),
            handlers: 1,
        }));
        assert!(routes.contains(&RouteInfo {
            method: Method::GET,
            pattern: "/api/me".into(),
            handlers: 2,
        }));

        let bad = RouteTable::new().add("FETCH:/x", vec![text("x")]);
        assert!(matches!(server.add_routes(bad), Err(RouteError::UnknownMethod { .. })));
    }

    #[tokio::test]
    async fn test_not_found_and_method_not_allowed() {
        let mut server = Server::new();
        server.get("/users", vec![text("list")]).unwrap();
        server.put("/users", vec![text("replace")]).unwrap();
        let service = server.into_service();

        let response = call(&service, Method::GET, "/nothing").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"404 page not found");

        let response = call(&service, Method::DELETE, "/users").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, PUT");
    }

    #[tokio::test]
    async fn test_fixed_path_redirect_keeps_query() {
        let mut server = Server::new();
        server.redirect_fixed_path(true);
        server
            .get(
                "/Users/:id",
                vec![handler(|ctx| {
                    Box::pin(async move {
                        let id = ctx.param("id").to_string();
                        ctx.reply(StatusCode::OK, Json(serde_json::json!({ "id": id }))).await
                    })
                })],
            )
            .unwrap();
        let service = server.into_service();

        let response = call(&service, Method::GET, "/users//42/../42?x=1").await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/Users/42?x=1");

        let response = call(&service, Method::GET, "/Users/42").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_contexts_are_pooled() {
        let mut server = Server::new();
        server.get("/", vec![text("root")]).unwrap();
        let service = server.into_service();

        for _ in 0..3 {
            let response = call(&service, Method::GET, "/").await;
            let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&body[..], b"root");
        }
        // The dispatch task may finish slightly after the body is drained.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(service.pooled_contexts(), 1);
    }
}
