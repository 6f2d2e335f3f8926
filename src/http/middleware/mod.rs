//! Request middleware.
//!
//! # Data Flow
//! ```text
//! request ──▶ detach (disconnect signal, spawned task)
//!         ──▶ instrument (metrics + access log, per matched route)
//!         ──▶ limit (indexer) / compress (matcher, notifier, discovery)
//!         ──▶ handler
//! ```

pub mod cancel;
pub mod compress;
pub mod instrument;
pub mod limit;

pub use cancel::{detach, Disconnect};
pub use compress::{compress, FlushFrames};
pub use instrument::instrument;
pub use limit::{index_report_rule, limit, ConcurrencyLimiter, Route};
