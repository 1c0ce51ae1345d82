//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build engines → Build server → Register routes
//!
//! Shutdown (shutdown.rs):
//!     Signal received (signals.rs) → trigger → server stops accepting → drain → exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then engines, then the listener
//! - In-flight requests finish before the server returns

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{build_engines, build_server, Engines, StartupError};
