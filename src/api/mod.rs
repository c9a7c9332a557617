pub mod status;
pub mod transactions;
pub mod webhooks;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::ServerConfig;
use crate::health::HealthChecker;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::TransactionService;
use webhooks::WebhookState;

#[derive(Clone)]
pub struct AppState {
    pub transactions: Arc<TransactionService>,
    pub notifications: Arc<WebhookState>,
    pub health_checker: HealthChecker,
}

/// Routes without cross-cutting layers.
pub fn router(state: AppState) -> Router {
    let notification_routes = Router::new()
        .route("/notification", post(webhooks::handle_notification))
        .route("/webhook", post(webhooks::handle_notification))
        .with_state(state.notifications);

    let transaction_routes = Router::new()
        .route(
            "/create-transaction",
            post(transactions::create_transaction),
        )
        .route("/retry-transaction", post(transactions::retry_transaction))
        .route(
            "/check-transaction/{order_id}",
            get(transactions::check_transaction),
        )
        .with_state(state.transactions);

    let status_routes = Router::new()
        .route("/", get(status::root))
        .route("/status", get(status::status))
        .route("/health", get(status::health))
        .with_state(state.health_checker);

    Router::new()
        .merge(status_routes)
        .merge(transaction_routes)
        .merge(notification_routes)
}

/// Full application: routes plus request-id, logging, tracing and CORS layers.
pub fn build_app(state: AppState, server: &ServerConfig) -> Router {
    router(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(cors_layer(server))
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if server.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = server
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}
