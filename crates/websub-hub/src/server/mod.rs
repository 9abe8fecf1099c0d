//! HTTP server for the hub.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

use crate::config::HubConfig;
use crate::hub::IntentVerifier;
use crate::store::Store;

mod locks;
mod routes;

pub use locks::SubscriptionLocks;

/// Server application state
pub struct AppState {
    /// Subscription store and topic registry
    pub store: Store,
    /// Verification-of-intent handshake runner
    pub verifier: IntentVerifier,
    /// Per-(topic, callback) mutation locks
    pub locks: SubscriptionLocks,
}

impl AppState {
    pub fn new(store: Store, verifier: IntentVerifier) -> Self {
        Self {
            store,
            verifier,
            locks: SubscriptionLocks::default(),
        }
    }
}

/// Start the HTTP server
pub async fn start(config: &HubConfig, store: Store) -> Result<()> {
    let verifier = IntentVerifier::new(
        Duration::from_secs(config.verification.timeout_seconds),
        config.lease.default_seconds,
    );
    let state = Arc::new(AppState::new(store, verifier));

    let app = create_router(state);

    info!("Starting HTTP server on {}", config.listen);
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the router with all routes and middleware.
///
/// Subscription POSTs are accepted on any path; the path itself is not
/// inspected.
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/", post(routes::subscription::handle))
        .route("/*path", post(routes::subscription::handle))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Simple health check endpoint (for load balancers)
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "service": "websub-hub",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Ok(false) => {
            warn!("Health check: store unhealthy");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "websub-hub",
                    "version": env!("CARGO_PKG_VERSION"),
                    "error": "store unhealthy"
                })),
            )
        }
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "websub-hub",
                    "version": env!("CARGO_PKG_VERSION"),
                    "error": format!("store error: {}", e)
                })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let verifier = IntentVerifier::new(Duration::from_secs(1), 864_000);
        Arc::new(AppState::new(Store::Memory(MemoryStore::default()), verifier))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(test_state());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "websub-hub");
    }
}
