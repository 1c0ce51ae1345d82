//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route registration (at startup):
//!     (method, pattern, handler chain)
//!     → tree.rs (insert into the per-method radix tree)
//!     → Freeze: trees are read-only once serving starts
//!
//! Incoming request (method, path):
//!     → tree.rs (descend the tree of that method)
//!     → params.rs (captured `:name` / `*name` values)
//!     → Return: handler chain, or a trailing-slash hint
//!
//! Fallbacks:
//!     → path.rs (clean `//`, `.` and `..`)
//!     → tree.rs (case-insensitive lookup of the cleaned path)
//! ```
//!
//! # Design Decisions
//! - One radix tree per HTTP method
//! - Siblings ordered by priority (most-loaded subtree first)
//! - At most one wildcard child per node; catch-all must end the pattern
//! - Construction errors are returned, lookups never fail

pub mod params;
pub mod path;
pub mod tree;

pub use params::{Param, Params};
pub use path::clean_path;
pub use tree::{Lookup, Node, RouteError, Trees};
