use crate::payments::error::PaymentResult;
use crate::payments::types::{AuthoritativeStatus, SnapTransaction, SnapTransactionRequest};
use async_trait::async_trait;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Request a checkout token for a new transaction. Never retried.
    async fn create_transaction(
        &self,
        request: SnapTransactionRequest,
    ) -> PaymentResult<SnapTransaction>;

    /// Query the gateway for the current status of an order.
    async fn fetch_transaction_status(&self, order_id: &str) -> PaymentResult<AuthoritativeStatus>;

    fn name(&self) -> &'static str;
}
