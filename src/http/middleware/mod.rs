//! Handler-chain middleware.
//!
//! # Data Flow
//! ```text
//! request → recovery → request_id → logger → [session / auth / limits] → route chain
//!                                       ▲
//!                      each calls ctx.next() and resumes after it
//! ```
//!
//! # Design Decisions
//! - A middleware is an ordinary [`Handler`] that calls `ctx.next()`
//! - Chains are plain `Vec<Handler>`; builders return new vectors and never
//!   mutate the chains they were built from

pub mod logger;
pub mod recovery;
pub mod request_id;

pub use logger::logger;
pub use recovery::recovery;
pub use request_id::{request_id, X_REQUEST_ID};

use super::context::Handler;

/// An immutable, reusable list of handlers run ahead of route handlers.
#[derive(Clone, Default)]
pub struct Middleware {
    handlers: Vec<Handler>,
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl Middleware {
    pub fn new(handlers: impl IntoIterator<Item = Handler>) -> Self {
        Self {
            handlers: handlers.into_iter().collect(),
        }
    }

    /// The chain `self ++ [last]`, ready for route registration.
    pub fn then(&self, last: Handler) -> Vec<Handler> {
        let mut chain = Vec::with_capacity(self.handlers.len() + 1);
        chain.extend_from_slice(&self.handlers);
        chain.push(last);
        chain
    }

    /// A new middleware list with `more` appended.
    pub fn append(&self, more: impl IntoIterator<Item = Handler>) -> Self {
        let mut handlers = self.handlers.clone();
        handlers.extend(more);
        Self { handlers }
    }

    /// A new middleware list with the handlers of `other` appended.
    pub fn extend(&self, other: &Middleware) -> Self {
        self.append(other.handlers.iter().cloned())
    }

    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn into_handlers(self) -> Vec<Handler> {
        self.handlers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::context::{handler, Context};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;

    fn mark(label: &'static str, trace: Arc<parking_lot::Mutex<Vec<&'static str>>>) -> Handler {
        handler(move |_| {
            let trace = trace.clone();
            Box::pin(async move { trace.lock().push(label) })
        })
    }

    #[tokio::test]
    async fn test_builders_do_not_mutate() {
        let trace = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let base = Middleware::new([mark("a", trace.clone())]);
        let wider = base.append([mark("b", trace.clone())]);
        let widest = wider.extend(&Middleware::new([mark("c", trace.clone())]));
        assert_eq!(base.len(), 1);
        assert_eq!(wider.len(), 2);

        let chain = widest.then(mark("h", trace.clone()));
        let (mut ctx, _rx) = Context::for_request(Request::new(Body::empty()), None);
        ctx.run(&[], &chain).await;
        assert_eq!(*trace.lock(), vec!["a", "b", "c", "h"]);
    }
}
