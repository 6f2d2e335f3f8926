//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers, family mounting)
//!     → middleware/ (disconnect, instrumentation, limit, compress)
//!     → handlers/ (negotiate, validate, call services, encode)
//!     → problem.rs on every failure path
//! ```

pub mod body;
pub mod conditional;
pub mod handlers;
pub mod middleware;
pub mod negotiate;
pub mod problem;
pub mod request;
pub mod server;

pub use request::{RequestCtx, X_REQUEST_ID};
pub use server::{HttpServer, ServerError};
