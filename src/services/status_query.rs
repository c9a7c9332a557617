use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::payments::error::PaymentError;
use crate::payments::provider::PaymentGateway;
use crate::payments::types::AuthoritativeStatus;
use crate::services::notification_event::ReconcileError;

/// Re-verifies a transaction's status directly with the gateway.
#[derive(Clone)]
pub struct StatusQueryClient {
    gateway: Arc<dyn PaymentGateway>,
    request_timeout: Duration,
}

impl StatusQueryClient {
    pub fn new(gateway: Arc<dyn PaymentGateway>, request_timeout: Duration) -> Self {
        Self {
            gateway,
            request_timeout,
        }
    }

    pub async fn fetch_authoritative_status(
        &self,
        order_id: &str,
    ) -> Result<AuthoritativeStatus, ReconcileError> {
        let result = timeout(
            self.request_timeout,
            self.gateway.fetch_transaction_status(order_id),
        )
        .await
        .map_err(|_| {
            error!(
                order_id = %order_id,
                timeout_ms = self.request_timeout.as_millis() as u64,
                "status query timed out"
            );
            ReconcileError::UpstreamUnavailable {
                message: format!("status query timed out after {:?}", self.request_timeout),
            }
        })?;

        match result {
            Ok(status) => {
                info!(
                    order_id = %order_id,
                    gateway = self.gateway.name(),
                    transaction_status = %status.transaction_status,
                    fraud_status = status.fraud_status.map(|f| f.as_str()).unwrap_or("-"),
                    "authoritative status fetched"
                );
                Ok(status)
            }
            Err(PaymentError::TransactionNotFound { order_id }) => {
                warn!(order_id = %order_id, "gateway has no record of order");
                Err(ReconcileError::OrderNotFoundUpstream { order_id })
            }
            Err(e) => {
                error!(order_id = %order_id, error = %e, "status query failed");
                Err(ReconcileError::UpstreamUnavailable {
                    message: e.to_string(),
                })
            }
        }
    }
}
