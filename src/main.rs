//! API engine demo server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ ApiService (axum::serve + TraceLayer)
//!                        │
//!                        ▼
//!                     Server::dispatch ── radix tree per method ── 301/307 / 404 / 405
//!                        │
//!                        ▼
//!     recovery → request_id → logger → session → [auth guard] → handler
//!                                         │                         │
//!                                   LRU + Store               Context replies
//!                        ◀───────────── ResponseWriter (pre-write hooks, body stream)
//! ```
//!
//! Routes:
//! - `GET  /health`   liveness
//! - `POST /login`    form/JSON `{user, password}` → AuthToken
//! - `POST /refresh`  `REFRESH-TOKEN` header → AuthToken
//! - `GET  /me`       `ACCESS-TOKEN` header → user id and session visits

use std::path::PathBuf;

use api_engine::config::{load_config, AppConfig};
use api_engine::http::{adapt, Bind, Json, Rules, Server, Validate, ValidationErrors};
use api_engine::lifecycle::{build_engines, build_server, shutdown_signal, Engines, Shutdown, StartupError};
use api_engine::observability::{logging, metrics};
use api_engine::security::Uid;
use api_engine::session::Session;
use axum::http::StatusCode;
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(name = "api-engine", version, about = "API engine demo server")]
struct Args {
    /// TOML configuration file; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
struct LoginForm {
    user: String,
    password: String,
}

impl Validate for LoginForm {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Rules::new()
            .alphanum("user", &self.user)
            .length("user", &self.user, 5, 32)
            .length("password", &self.password, 5, 32)
            .finish()
    }
}

async fn verify(Bind(form): Bind<LoginForm>) -> (StatusCode, String) {
    // Demo credentials: the password is the user name reversed.
    if form.password.chars().rev().eq(form.user.chars()) {
        (StatusCode::OK, form.user)
    } else {
        (StatusCode::BAD_REQUEST, "name or password error".to_string())
    }
}

async fn me(Uid(uid): Uid, session: Session) -> Json<Value> {
    let visits = session.get_as::<i64>("visits").unwrap_or(0) + 1;
    session.set("visits", visits);
    Json(json!({"uid": uid, "visits": visits}))
}

fn routes(server: &mut Server, engines: &Engines) -> Result<(), StartupError> {
    server.get("/health", vec![adapt(|| async { "ok" })])?;
    if let Some(auth) = engines.auth.as_ref() {
        server.post("/login", vec![auth.login_handler(verify)])?;
        server.post("/refresh", vec![auth.refresh_handler()])?;
        if engines.session.is_some() {
            server.get("/me", vec![auth.guard(), adapt(me)])?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match args.config.as_deref() {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init(&config.observability.log_level);
    tracing::info!("api-engine v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let engines = build_engines(&config)?;
    let mut server = build_server(&config, &engines);
    routes(&mut server, &engines)?;
    for route in server.routes() {
        tracing::debug!(method = %route.method, pattern = %route.pattern, "route registered");
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    server.into_service().run(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
