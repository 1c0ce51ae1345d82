//! Panic recovery.

use std::panic::AssertUnwindSafe;

use axum::http::StatusCode;
use futures_util::FutureExt;

use crate::http::context::{handler, Handler};

/// Catch a panic in any later handler and answer 500.
///
/// The panicking handler's partial state is discarded; if the head was
/// already written the status cannot change and only the log remains.
pub fn recovery() -> Handler {
    handler(|ctx| {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(ctx.next()).catch_unwind().await;
            if let Err(panic) = outcome {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(path = ctx.path(), panic = %message, "handler panicked");
                if ctx.writer().written() {
                    ctx.abort();
                    ctx.attach_error(format!("panic: {message}"));
                } else {
                    ctx.reply_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
                        .await;
                }
            }
        })
    })
}
