//! Access log and request metrics.

use std::time::Instant;

use crate::http::context::{handler, Handler};
use crate::observability::metrics;

/// Log method, path, status, size and latency of every request.
pub fn logger() -> Handler {
    handler(|ctx| {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.method().clone();
            let path = ctx.path().to_string();

            ctx.next().await;

            let elapsed = start.elapsed();
            let status = ctx.status();
            tracing::info!(
                method = %method,
                path = %path,
                status = status.as_u16(),
                size = ctx.writer().size(),
                latency_ms = elapsed.as_secs_f64() * 1000.0,
                errors = ctx.errors().len(),
                "request completed"
            );
            metrics::record_request(method.as_str(), status.as_u16(), elapsed);
        })
    })
}
