//! Per-request disconnect signal.
//!
//! axum drops a request's future when the client goes away. [`detach`] runs the rest of the stack in its own task so
//! the handler keeps running, and flips a [`Disconnect`] signal when the
//! outer future is dropped. Handlers observe it through `RequestCtx` and
//! answer 499, which the instrumentation layer then records.

use std::future;

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use tokio::sync::watch;

use crate::http::problem::{self, ApiError};

/// Fires when the client is no longer waiting for the response.
#[derive(Clone, Debug, Default)]
pub struct Disconnect {
    rx: Option<watch::Receiver<bool>>,
}

impl Disconnect {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn pair() -> (DisconnectGuard, Disconnect) {
        let (tx, rx) = watch::channel(false);
        (DisconnectGuard { tx: Some(tx) }, Disconnect { rx: Some(rx) })
    }

    pub fn is_disconnected(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve once the client has gone. Pends forever otherwise.
    pub async fn disconnected(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            if rx.wait_for(|gone| *gone).await.is_ok() {
                return;
            }
        }
        future::pending::<()>().await;
    }
}

/// Fires the paired [`Disconnect`] on drop unless disarmed.
#[derive(Debug)]
pub struct DisconnectGuard {
    tx: Option<watch::Sender<bool>>,
}

impl DisconnectGuard {
    /// The response was handed off; dropping no longer means disconnect.
    pub fn disarm(mut self) {
        self.tx.take();
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(true);
        }
    }
}

/// Run the inner stack in a spawned task wired to a disconnect signal.
pub async fn detach(mut req: Request, next: Next) -> Response {
    let (guard, disconnect) = Disconnect::pair();
    req.extensions_mut().insert(disconnect);

    let result = tokio::spawn(next.run(req)).await;
    guard.disarm();

    match result {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(error = %e, "request task failed");
            problem::render(&ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "request handler failed",
            ))
        }
    }
}
