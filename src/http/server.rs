//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Mount the API families the configured mode serves
//! - Wrap each family in its own middleware (limit or compress)
//! - Wire up request-scoped middleware (request id, tracing, panic catching,
//!   body limit, disconnect detection, instrumentation, timeout)
//! - Serve with graceful shutdown

use std::any::Any;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Response;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ScanwireConfig;
use crate::http::handlers::{self, matcher::MatcherState};
use crate::http::middleware::{
    compress, detach, index_report_rule, instrument, limit, ConcurrencyLimiter,
};
use crate::http::problem::{self, ApiError};
use crate::http::request::RequestCtx;
use crate::lifecycle::shutdown;
use crate::services::Services;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{mode} mode needs a {service} service")]
    MissingService {
        mode: crate::config::Mode,
        service: &'static str,
    },
}

/// HTTP server for the scanner API.
pub struct HttpServer {
    router: Router,
    config: ScanwireConfig,
}

impl HttpServer {
    pub fn new(config: ScanwireConfig, services: Services) -> Result<Self, ServerError> {
        let router = Self::build_router(&config, &services)?;
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ScanwireConfig, services: &Services) -> Result<Router, ServerError> {
        let mode = config.mode;
        let missing = |service| ServerError::MissingService { mode, service };
        let mut app = Router::new().merge(handlers::discovery::routes().layer(from_fn(compress)));

        if mode.serves_indexer() {
            let indexer = services.indexer.clone().ok_or_else(|| missing("indexer"))?;
            let limiter = Arc::new(ConcurrencyLimiter::new(index_report_rule(
                config.indexer.index_report_request_concurrency,
            )));
            app = app.merge(handlers::indexer::routes(indexer).layer(from_fn_with_state(limiter, limit)));
        }

        if mode.serves_matcher() {
            let state = MatcherState {
                matcher: services.matcher.clone().ok_or_else(|| missing("matcher"))?,
                indexer: services.indexer.clone().ok_or_else(|| missing("indexer"))?,
                cache_age: Duration::from_secs(config.matcher.cache_age_secs),
            };
            app = app.merge(handlers::matcher::routes(state).layer(from_fn(compress)));
        }

        if mode.serves_notifier() {
            let notifier = services.notifier.clone().ok_or_else(|| missing("notifier"))?;
            app = app.merge(
                handlers::notifier::routes(notifier, services.keys.clone()).layer(from_fn(compress)),
            );
        }

        // Timeout beneath instrument and detach: an expired request records 408.
        Ok(app
            .route_layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .route_layer(from_fn(instrument))
            .fallback(not_found)
            .layer(from_fn(detach))
            .layer(DefaultBodyLimit::max(config.security.max_body_size))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid)))
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `signal` fires, then drain for the grace period.
    pub async fn run(self, listener: TcpListener, signal: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, mode = %self.config.mode, "HTTP server starting");

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        let deadline = signal.resubscribe();
        let serve = axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown::recv(signal))
            .into_future();

        tokio::select! {
            res = serve => res?,
            () = async {
                shutdown::recv(deadline).await;
                tokio::time::sleep(grace).await;
            } => {
                tracing::warn!(grace_secs = grace.as_secs(), "grace period elapsed, dropping open connections");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ScanwireConfig {
        &self.config
    }
}

async fn not_found(ctx: RequestCtx) -> Response {
    ctx.api_error(StatusCode::NOT_FOUND, "no such endpoint")
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let msg = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = msg, "request handler panicked");
    problem::render(&ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "request handler panicked"))
}
