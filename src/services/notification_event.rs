//! Canonical notification event and the error taxonomy of the reconciliation flow.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::database::error::DatabaseError;
use crate::database::order_repository::OrderStatus;

/// A gateway callback after validation. Its status fields are hints only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationEvent {
    pub event_id: String,
    pub order_id: String,
    pub transaction_id: Option<String>,
    pub vendor_status: String,
    pub fraud_status: Option<String>,
    pub status_code: Option<String>,
    pub gross_amount: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: String },

    #[error("Event already applied: {event_id}")]
    DuplicateEvent { event_id: String },

    #[error("Payment gateway unavailable: {message}")]
    UpstreamUnavailable { message: String },

    #[error("Payment gateway has no record of order {order_id}")]
    OrderNotFoundUpstream { order_id: String },

    #[error("Invalid transition from {from} on gateway status {vendor_status}")]
    InvalidTransition {
        from: OrderStatus,
        to: Option<OrderStatus>,
        vendor_status: String,
    },

    #[error("Concurrent update conflict on order {order_id}")]
    ConcurrentUpdateConflict { order_id: String },

    #[error("Notification handling timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl ReconcileError {
    /// Whether the gateway should be asked to redeliver.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::UpstreamUnavailable { .. }
            | ReconcileError::OrderNotFoundUpstream { .. }
            | ReconcileError::ConcurrentUpdateConflict { .. }
            | ReconcileError::Timeout { .. } => true,
            ReconcileError::Storage(err) => err.is_retryable(),
            ReconcileError::InvalidPayload(_)
            | ReconcileError::AuthenticationFailed(_)
            | ReconcileError::OrderNotFound { .. }
            | ReconcileError::DuplicateEvent { .. }
            | ReconcileError::InvalidTransition { .. } => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            ReconcileError::InvalidPayload(_) => 400,
            ReconcileError::AuthenticationFailed(_) => 401,
            ReconcileError::OrderNotFound { .. } => 404,
            ReconcileError::DuplicateEvent { .. } | ReconcileError::InvalidTransition { .. } => {
                200
            }
            ReconcileError::UpstreamUnavailable { .. } => 503,
            ReconcileError::OrderNotFoundUpstream { .. } => 502,
            ReconcileError::ConcurrentUpdateConflict { .. } => 409,
            ReconcileError::Timeout { .. } => 504,
            ReconcileError::Storage(_) => 500,
        }
    }
}
