//! Checkout-facing transaction operations: create, retry and status check.
//!
//! Creation calls reach the gateway exactly once. Every order handed to the
//! gateway is recorded locally first so that its notifications can be
//! reconciled; a failed creation removes that record again.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::order_repository::NewOrder;
use crate::database::repository::OrderRepository;
use crate::error::{AppError, AppErrorKind, AppResult, ValidationError};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    gross_amount_from_json, CustomerDetails, ItemDetail, SnapTransaction, SnapTransactionRequest,
    TransactionStatus,
};
use crate::services::notification_validator::{is_valid_order_id, MAX_ORDER_ID_LEN};

pub const PLACEHOLDER_PHONE: &str = "081234567890";

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerInput {
    pub nickname: String,
    #[serde(default)]
    pub current_rank: Option<String>,
    #[serde(default)]
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemInput {
    pub id: String,
    pub price: JsonValue,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    pub name: String,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransactionRequest {
    pub order_id: Option<String>,
    pub amount: Option<JsonValue>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerInput>,
    #[serde(default)]
    pub item_details: Option<ItemInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryTransactionRequest {
    pub order_id: Option<String>,
    pub amount: Option<JsonValue>,
    #[serde(default)]
    pub payment_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryTransactionResponse {
    pub token: String,
    pub redirect_url: String,
    pub new_order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckTransactionResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub transaction_details: JsonValue,
}

pub struct TransactionService {
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<dyn OrderRepository>,
}

impl TransactionService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, orders: Arc<dyn OrderRepository>) -> Self {
        Self { gateway, orders }
    }

    pub async fn create_transaction(
        &self,
        request: CreateTransactionRequest,
    ) -> AppResult<SnapTransaction> {
        let order_id = required_order_id(request.order_id.as_deref())?;
        let gross_amount = required_amount(request.amount.as_ref(), "amount")?;

        let mut params = SnapTransactionRequest::new(order_id.clone(), gross_amount);
        if let Some(customer) = request.customer_details {
            params.customer_details = Some(placeholder_customer(&customer.nickname)?);
            params.custom_field1 = Some(customer.current_rank.unwrap_or_default());
            params.custom_field2 = Some(customer.referral_code.unwrap_or_default());
        }
        if let Some(item) = request.item_details {
            params.item_details.push(ItemDetail {
                id: item.id,
                price: required_amount(Some(&item.price), "item_details.price")?,
                quantity: item.quantity,
                name: item.name,
            });
        }

        info!(
            order_id = %order_id,
            gross_amount,
            payment_type = request.payment_type.as_deref().unwrap_or("-"),
            "create transaction request"
        );

        self.record_and_create(params).await
    }

    pub async fn retry_transaction(
        &self,
        request: RetryTransactionRequest,
    ) -> AppResult<RetryTransactionResponse> {
        let order_id = required_order_id(request.order_id.as_deref())?;
        let gross_amount = required_amount(request.amount.as_ref(), "amount")?;

        let new_order_id = suffixed_order_id(&order_id, "RETRY")?;
        info!(
            order_id = %order_id,
            new_order_id = %new_order_id,
            gross_amount,
            "retry transaction request"
        );

        let transaction = self
            .record_and_create(SnapTransactionRequest::new(new_order_id.clone(), gross_amount))
            .await?;

        Ok(RetryTransactionResponse {
            token: transaction.token,
            redirect_url: transaction.redirect_url,
            new_order_id,
        })
    }

    /// Report the gateway's status; pending or expired payments also get a
    /// fresh checkout token under a derived order id.
    pub async fn check_transaction(&self, order_id: &str) -> AppResult<CheckTransactionResponse> {
        if !is_valid_order_id(order_id) {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidField {
                    field: "order_id".to_string(),
                    reason: "must be 1-50 characters of letters, digits, '-', '_', '.' or '~'"
                        .to_string(),
                },
            )));
        }

        let status = self.gateway.fetch_transaction_status(order_id).await?;
        let mut response = CheckTransactionResponse {
            status: status.transaction_status.as_str().to_string(),
            token: None,
            redirect_url: None,
            transaction_details: status.raw.clone(),
        };

        if matches!(
            status.transaction_status,
            TransactionStatus::Pending | TransactionStatus::Expire
        ) {
            match self.refresh_token(order_id, status.gross_amount).await {
                Ok(transaction) => {
                    response.token = Some(transaction.token);
                    response.redirect_url = Some(transaction.redirect_url);
                }
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "failed to refresh checkout token");
                }
            }
        }

        Ok(response)
    }

    async fn refresh_token(&self, order_id: &str, gross_amount: i64) -> AppResult<SnapTransaction> {
        if gross_amount <= 0 {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidAmount {
                    amount: gross_amount.to_string(),
                    reason: "gateway reported no usable amount".to_string(),
                },
            )));
        }
        let refresh_id = suffixed_order_id(order_id, "REFRESH")?;
        self.record_and_create(SnapTransactionRequest::new(refresh_id, gross_amount))
            .await
    }

    async fn record_and_create(
        &self,
        params: SnapTransactionRequest,
    ) -> AppResult<SnapTransaction> {
        let order = self
            .orders
            .insert_order(NewOrder {
                order_id: params.order_id().to_string(),
                gross_amount: params.transaction_details.gross_amount,
            })
            .await?;

        let transaction = match self.gateway.create_transaction(params).await {
            Ok(transaction) => transaction,
            Err(e) => {
                // Free the id so the caller can resubmit the same order.
                if let Err(discard_err) =
                    self.orders.discard_untouched_order(&order.order_id).await
                {
                    warn!(
                        order_id = %order.order_id,
                        error = %discard_err,
                        "failed to discard order after gateway rejection"
                    );
                }
                return Err(e.into());
            }
        };
        info!(
            order_id = %order.order_id,
            gateway = self.gateway.name(),
            "checkout token issued"
        );
        Ok(transaction)
    }
}

fn required_order_id(order_id: Option<&str>) -> AppResult<String> {
    let order_id = order_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::missing_field("order_id"))?;

    if !is_valid_order_id(order_id) {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidField {
                field: "order_id".to_string(),
                reason: "must be 1-50 characters of letters, digits, '-', '_', '.' or '~'"
                    .to_string(),
            },
        )));
    }
    Ok(order_id.to_string())
}

fn required_amount(value: Option<&JsonValue>, field: &str) -> AppResult<i64> {
    let value = value
        .filter(|v| !v.is_null())
        .ok_or_else(|| AppError::missing_field(field))?;
    let amount = gross_amount_from_json(value).map_err(|e| {
        AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: value.to_string(),
            reason: e.to_string(),
        }))
    })?;
    if amount <= 0 {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidAmount {
                amount: amount.to_string(),
                reason: "amount must be greater than zero".to_string(),
            },
        )));
    }
    Ok(amount)
}

fn placeholder_customer(nickname: &str) -> AppResult<CustomerDetails> {
    let nickname = nickname.trim();
    if nickname.is_empty() {
        return Err(AppError::missing_field("customer_details.nickname"));
    }
    Ok(CustomerDetails {
        first_name: nickname.to_string(),
        email: format!("{}@example.com", nickname.to_lowercase()),
        phone: PLACEHOLDER_PHONE.to_string(),
    })
}

/// `"{order_id}_{tag}_{last five digits of the current epoch millis}"`
fn suffixed_order_id(order_id: &str, tag: &str) -> AppResult<String> {
    let suffix = Utc::now().timestamp_millis().rem_euclid(100_000);
    let derived = format!("{}_{}_{:05}", order_id, tag, suffix);
    if derived.len() > MAX_ORDER_ID_LEN {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidField {
                field: "order_id".to_string(),
                reason: format!(
                    "too long to derive a {} order id (max {} characters)",
                    tag.to_lowercase(),
                    MAX_ORDER_ID_LEN
                ),
            },
        )));
    }
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::in_memory::InMemoryStore;
    use crate::error::ErrorCode;
    use crate::payments::error::PaymentError;
    use crate::payments::providers::MockGateway;
    use serde_json::json;

    fn service(gateway: Arc<MockGateway>, store: &InMemoryStore) -> TransactionService {
        TransactionService::new(gateway, Arc::new(store.clone()))
    }

    #[test]
    fn derived_ids_keep_five_digit_suffix() {
        let id = suffixed_order_id("ORD-1", "RETRY").unwrap();
        let suffix = id.strip_prefix("ORD-1_RETRY_").unwrap();
        assert_eq!(suffix.len(), 5);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
        assert!(is_valid_order_id(&id));

        assert!(suffixed_order_id(&"x".repeat(40), "REFRESH").is_err());
    }

    #[test]
    fn placeholder_contact_uses_lowercased_nickname() {
        let customer = placeholder_customer("RiderOne").unwrap();
        assert_eq!(customer.first_name, "RiderOne");
        assert_eq!(customer.email, "riderone@example.com");
        assert_eq!(customer.phone, PLACEHOLDER_PHONE);
    }

    #[tokio::test]
    async fn create_shapes_snap_parameters_and_records_order() {
        let gateway = Arc::new(MockGateway::new());
        let store = InMemoryStore::new();
        let service = service(gateway.clone(), &store);

        let request: CreateTransactionRequest = serde_json::from_value(json!({
            "order_id": "ORD-7",
            "amount": "25000",
            "customer_details": { "nickname": "Budi", "current_rank": "gold" },
            "item_details": { "id": "SKU-1", "price": 25000, "quantity": 1, "name": "Boost" }
        }))
        .unwrap();

        let transaction = service.create_transaction(request).await.unwrap();
        assert_eq!(transaction.token, "mock-token-ORD-7");

        let sent = gateway.created_transactions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].transaction_details.gross_amount, 25000);
        assert_eq!(sent[0].custom_field1.as_deref(), Some("gold"));
        assert_eq!(sent[0].custom_field2.as_deref(), Some(""));
        assert_eq!(sent[0].item_details[0].id, "SKU-1");

        let order = store.find_order("ORD-7").await.unwrap().unwrap();
        assert_eq!(order.gross_amount, 25000);
    }

    #[tokio::test]
    async fn duplicate_order_is_conflict_without_gateway_call() {
        let gateway = Arc::new(MockGateway::new());
        let store = InMemoryStore::new();
        let service = service(gateway.clone(), &store);
        let request = || CreateTransactionRequest {
            order_id: Some("ORD-7".to_string()),
            amount: Some(json!(1000)),
            payment_type: None,
            customer_details: None,
            item_details: None,
        };

        service.create_transaction(request()).await.unwrap();
        let err = service.create_transaction(request()).await.unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert_eq!(gateway.created_transactions().len(), 1);
    }

    #[tokio::test]
    async fn failed_creation_frees_order_id() {
        let gateway = Arc::new(MockGateway::new());
        let store = InMemoryStore::new();
        let service = service(gateway.clone(), &store);
        let request = || CreateTransactionRequest {
            order_id: Some("ORD-8".to_string()),
            amount: Some(json!(1000)),
            payment_type: None,
            customer_details: None,
            item_details: None,
        };

        gateway.fail_creation_with(PaymentError::NetworkError {
            message: "connection reset".to_string(),
        });
        let err = service.create_transaction(request()).await.unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert!(store.find_order("ORD-8").await.unwrap().is_none());

        gateway.clear_creation_failure();
        let transaction = service.create_transaction(request()).await.unwrap();
        assert_eq!(transaction.token, "mock-token-ORD-8");
        let order = store.find_order("ORD-8").await.unwrap().unwrap();
        assert_eq!(order.version, 0);
    }

    #[tokio::test]
    async fn missing_amount_is_validation_error() {
        let gateway = Arc::new(MockGateway::new());
        let store = InMemoryStore::new();
        let service = service(gateway.clone(), &store);

        let err = service
            .retry_transaction(RetryTransactionRequest {
                order_id: Some("ORD-7".to_string()),
                amount: None,
                payment_type: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), ErrorCode::ValidationError);
        assert!(gateway.created_transactions().is_empty());
    }

    #[tokio::test]
    async fn check_pending_issues_refresh_token() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_status("ORD-9", TransactionStatus::Pending, None, 5000);
        let store = InMemoryStore::new();
        let service = service(gateway.clone(), &store);

        let response = service.check_transaction("ORD-9").await.unwrap();
        assert_eq!(response.status, "pending");
        assert!(response.token.is_some());

        let sent = gateway.created_transactions();
        assert!(sent[0].order_id().starts_with("ORD-9_REFRESH_"));
        assert_eq!(sent[0].transaction_details.gross_amount, 5000);
    }

    #[tokio::test]
    async fn check_settled_returns_status_only() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_status("ORD-9", TransactionStatus::Settlement, None, 5000);
        let store = InMemoryStore::new();
        let service = service(gateway.clone(), &store);

        let response = service.check_transaction("ORD-9").await.unwrap();
        assert_eq!(response.status, "settlement");
        assert!(response.token.is_none());
        assert!(gateway.created_transactions().is_empty());

        let missing = service.check_transaction("ORD-404").await.unwrap_err();
        assert_eq!(missing.status_code(), 404);
    }
}
