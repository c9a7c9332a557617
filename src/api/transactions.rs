use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use crate::error::{AppError, AppErrorKind, AppResult, ValidationError};
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::types::SnapTransaction;
use crate::services::transaction_service::{
    CheckTransactionResponse, CreateTransactionRequest, RetryTransactionRequest,
    RetryTransactionResponse, TransactionService,
};

/// POST /create-transaction
pub async fn create_transaction(
    State(service): State<Arc<TransactionService>>,
    headers: HeaderMap,
    body: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> AppResult<Json<SnapTransaction>> {
    let request_id = get_request_id_from_headers(&headers);
    let Json(request) = body.map_err(|e| body_error(e, request_id.clone()))?;

    service
        .create_transaction(request)
        .await
        .map(Json)
        .map_err(|e| tag(e, request_id))
}

/// POST /retry-transaction
pub async fn retry_transaction(
    State(service): State<Arc<TransactionService>>,
    headers: HeaderMap,
    body: Result<Json<RetryTransactionRequest>, JsonRejection>,
) -> AppResult<Json<RetryTransactionResponse>> {
    let request_id = get_request_id_from_headers(&headers);
    let Json(request) = body.map_err(|e| body_error(e, request_id.clone()))?;

    service
        .retry_transaction(request)
        .await
        .map(Json)
        .map_err(|e| tag(e, request_id))
}

/// GET /check-transaction/{order_id}
pub async fn check_transaction(
    State(service): State<Arc<TransactionService>>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> AppResult<Json<CheckTransactionResponse>> {
    service
        .check_transaction(&order_id)
        .await
        .map(Json)
        .map_err(|e| tag(e, get_request_id_from_headers(&headers)))
}

fn body_error(rejection: JsonRejection, request_id: Option<String>) -> AppError {
    tag(
        AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: "body".to_string(),
            reason: rejection.body_text(),
        })),
        request_id,
    )
}

fn tag(err: AppError, request_id: Option<String>) -> AppError {
    match request_id {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}
