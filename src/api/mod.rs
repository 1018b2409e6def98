// HTTP APIs: public share stream, admin endpoints, and health

mod error;
mod sse;
pub mod admin;
pub mod public;

pub use admin::create_admin_router;
pub use error::ApiError;
pub use public::create_public_router;

use crate::auth::ShareRegistry;
use crate::config::CarcastConfig;
use crate::state::Store;
use crate::stream::Hub;
use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

/// Shared state for every HTTP handler
pub struct AppState {
    pub store: Arc<Store>,
    pub hub: Arc<Hub>,
    pub shares: Arc<ShareRegistry>,
    pub heartbeat: Duration,
    /// Lifetime of a share created without an explicit expiry
    pub share_ttl: Duration,
    /// Bearer token for admin routes. None = admin routes open.
    pub admin_token: Option<String>,
    /// Flips to `true` when the process is shutting down; open streams end then
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        store: Arc<Store>,
        hub: Arc<Hub>,
        shares: Arc<ShareRegistry>,
        config: &CarcastConfig,
    ) -> Self {
        // Never signalled unless replaced through `with_shutdown`
        let (_, shutdown) = watch::channel(false);
        Self {
            store,
            hub,
            shares,
            heartbeat: config.stream.heartbeat(),
            share_ttl: config.shares.default_ttl(),
            admin_token: config.http.admin_token.clone(),
            shutdown,
        }
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// CORS for the configured origins; any origin when none are configured
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

/// Full application router
pub fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .merge(create_public_router(Arc::clone(&state)))
        .merge(create_admin_router(state))
        .layer(cors_layer(cors_origins))
}
