//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → every subscriber wakes → server stops accepting
//!     → in-flight requests drain (bounded by the grace period) → exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
