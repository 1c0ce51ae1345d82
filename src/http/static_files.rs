//! Filesystem-backed handlers for `Server::static_dir` and `Server::static_file`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use bytes::Bytes;

use super::context::{handler, Context, Handler};
use super::reply::Payload;
use crate::routing::clean_path;

/// Name of the catch-all param used by directory routes.
pub const FILEPATH_PARAM: &str = "filepath";

/// Serve files below `root`, addressed by the `*filepath` param.
pub fn serve_dir(root: impl Into<PathBuf>) -> Handler {
    let root: Arc<PathBuf> = Arc::new(root.into());
    handler(move |ctx| {
        let root = root.clone();
        Box::pin(async move {
            // clean_path drops any `..` that would climb above the root.
            let relative = clean_path(ctx.param(FILEPATH_PARAM));
            let path = root.join(relative.trim_start_matches('/'));
            send_file(ctx, &path).await;
        })
    })
}

/// Serve the single file at `path`.
pub fn serve_file(path: impl Into<PathBuf>) -> Handler {
    let path: Arc<PathBuf> = Arc::new(path.into());
    handler(move |ctx| {
        let path = path.clone();
        Box::pin(async move { send_file(ctx, &path).await })
    })
}

async fn send_file(ctx: &mut Context, path: &Path) {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => {
            ctx.reply(StatusCode::NOT_FOUND, "404 page not found").await;
            return;
        }
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {
            ctx.reply(StatusCode::NOT_FOUND, "404 page not found").await;
            return;
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to stat static file");
            ctx.reply_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read file")
                .await;
            return;
        }
    }

    match tokio::fs::read(path).await {
        Ok(data) => {
            ctx.set_header(header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(path)));
            ctx.reply(StatusCode::OK, Payload::from(Bytes::from(data))).await;
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            ctx.reply(StatusCode::NOT_FOUND, "404 page not found").await;
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read static file");
            ctx.reply_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read file")
                .await;
        }
    }
}

/// Media type guessed from the file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" | "md" => "text/plain; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}
