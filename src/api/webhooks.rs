use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::middleware::error::NotificationAck;
use crate::services::{
    NotificationValidator, OrderReconciler, ReconcileError, ReconcileOutcome,
};

pub struct WebhookState {
    pub validator: NotificationValidator,
    pub reconciler: Arc<OrderReconciler>,
    pub timeout: Duration,
}

/// POST /notification and POST /webhook
pub async fn handle_notification(
    State(state): State<Arc<WebhookState>>,
    body: String,
) -> Result<impl IntoResponse, ReconcileError> {
    let payload: JsonValue = serde_json::from_str(&body).map_err(|e| {
        warn!(error = %e, "notification body is not valid JSON");
        ReconcileError::InvalidPayload(format!("body is not valid JSON: {}", e))
    })?;

    let event = state.validator.validate(&payload).map_err(|e| {
        warn!(error = %e, "notification rejected by validator");
        e
    })?;

    info!(
        order_id = %event.order_id,
        event_id = %event.event_id,
        vendor_status = %event.vendor_status,
        "Received payment notification"
    );

    let outcome = tokio::time::timeout(state.timeout, state.reconciler.reconcile(&event))
        .await
        .map_err(|_| {
            error!(
                order_id = %event.order_id,
                event_id = %event.event_id,
                "notification handling timed out"
            );
            ReconcileError::Timeout {
                timeout_secs: state.timeout.as_secs(),
            }
        })?
        .map_err(|e| {
            if e.is_retryable() {
                error!(
                    order_id = %event.order_id,
                    event_id = %event.event_id,
                    error = %e,
                    "notification failed, gateway should redeliver"
                );
            } else {
                warn!(
                    order_id = %event.order_id,
                    event_id = %event.event_id,
                    error = %e,
                    "notification not applied"
                );
            }
            e
        })?;

    let message = match &outcome {
        ReconcileOutcome::Applied { from, to, .. } => format!(
            "Order {} moved from {} to {}",
            event.order_id, from, to
        ),
        ReconcileOutcome::Unchanged { status } => {
            format!("Order {} is already {}", event.order_id, status)
        }
        ReconcileOutcome::AlreadyProcessed => {
            format!("Notification {} was already processed", event.event_id)
        }
        ReconcileOutcome::Rejected { reason, .. } => {
            format!("Notification for order {} ignored: {}", event.order_id, reason)
        }
    };

    Ok((StatusCode::OK, Json(NotificationAck::ok(message))))
}
