//! Wire-protocol layer of a container vulnerability scanner.
//!
//! A streaming JSON codec for the scanner's records, plus the HTTP
//! semantics around it: content negotiation, conditional requests,
//! response compression, concurrency limiting and problem-detail errors.

pub mod codec;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod services;
pub mod types;

pub use config::schema::ScanwireConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use services::{MemoryBackend, Services};
