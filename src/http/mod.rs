//! HTTP request-handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (ApiService, context pool, route dispatch)
//!     → context.rs (handler chain, registry, binding, replies)
//!         → inject.rs (argument resolution for plain async fns)
//!         → bind.rs + validate.rs (body/query/params → typed value)
//!         → reply.rs (payloads, renderers, return-value reduction)
//!     → writer.rs (deferred status, pre-write hooks, body stream)
//!     → Send to client
//! ```

pub mod bind;
pub mod context;
pub mod inject;
pub mod middleware;
pub mod registry;
pub mod reply;
pub mod server;
pub mod static_files;
pub mod validate;
pub mod writer;

pub use bind::BindError;
pub use context::{handler, Context, Handler, ABORT_INDEX};
pub use inject::{adapt, Bind, Dep, FromContext, Iface, Injectable, Rejection, RemoteAddr, RequestId};
pub use middleware::Middleware;
pub use registry::{RegistryError, TypeKey, TypeRegistry};
pub use reply::{stream_fn, Event, HttpError, IntoReplyParts, Json, Payload, Reader, ReplyParts, StreamFn, Xml};
pub use server::{ApiService, RouteInfo, RouteTable, Server};
pub use validate::{Rules, Validate, ValidationErrors};
pub use writer::{hook, BoxError, ResponseWriter, WriteError};
