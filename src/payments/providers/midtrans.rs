use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    gross_amount_from_json, AuthoritativeStatus, FraudStatus, SnapTransaction,
    SnapTransactionRequest, TransactionStatus,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, info};

const SANDBOX_SNAP_URL: &str = "https://app.sandbox.midtrans.com/snap/v1";
const PRODUCTION_SNAP_URL: &str = "https://app.midtrans.com/snap/v1";
const SANDBOX_API_URL: &str = "https://api.sandbox.midtrans.com/v2";
const PRODUCTION_API_URL: &str = "https://api.midtrans.com/v2";

#[derive(Debug, Clone)]
pub struct MidtransConfig {
    pub server_key: String,
    pub client_key: String,
    pub is_production: bool,
    pub snap_base_url: String,
    pub api_base_url: String,
    pub timeout_secs: u64,
    pub status_max_retries: u32,
}

impl Default for MidtransConfig {
    fn default() -> Self {
        Self {
            server_key: String::new(),
            client_key: String::new(),
            is_production: false,
            snap_base_url: SANDBOX_SNAP_URL.to_string(),
            api_base_url: SANDBOX_API_URL.to_string(),
            timeout_secs: 15,
            status_max_retries: 1,
        }
    }
}

impl MidtransConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let server_key = required_env("MIDTRANS_SERVER_KEY")?;
        let client_key = required_env("MIDTRANS_CLIENT_KEY")?;

        let is_production = std::env::var("MIDTRANS_IS_PRODUCTION")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or_else(|| {
                std::env::var("NODE_ENV")
                    .map(|v| v.eq_ignore_ascii_case("production"))
                    .unwrap_or(false)
            });

        let (default_snap, default_api) = if is_production {
            (PRODUCTION_SNAP_URL, PRODUCTION_API_URL)
        } else {
            (SANDBOX_SNAP_URL, SANDBOX_API_URL)
        };

        Ok(Self {
            server_key,
            client_key,
            is_production,
            snap_base_url: std::env::var("MIDTRANS_SNAP_BASE_URL")
                .unwrap_or_else(|_| default_snap.to_string()),
            api_base_url: std::env::var("MIDTRANS_API_BASE_URL")
                .unwrap_or_else(|_| default_api.to_string()),
            timeout_secs: std::env::var("MIDTRANS_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(15),
            status_max_retries: std::env::var("MIDTRANS_STATUS_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(1),
        })
    }

    pub fn validate(&self) -> PaymentResult<()> {
        for (field, value) in [
            ("MIDTRANS_SNAP_BASE_URL", &self.snap_base_url),
            ("MIDTRANS_API_BASE_URL", &self.api_base_url),
        ] {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                return Err(PaymentError::ValidationError {
                    message: format!("{} must be an http(s) URL", field),
                    field: Some(field.to_string()),
                });
            }
        }
        if self.server_key.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "server key cannot be empty".to_string(),
                field: Some("MIDTRANS_SERVER_KEY".to_string()),
            });
        }
        if self.timeout_secs == 0 {
            return Err(PaymentError::ValidationError {
                message: "timeout must be greater than zero".to_string(),
                field: Some("MIDTRANS_TIMEOUT_SECS".to_string()),
            });
        }
        Ok(())
    }
}

fn required_env(name: &str) -> PaymentResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(PaymentError::ValidationError {
            message: format!("{} environment variable is required", name),
            field: Some(name.to_string()),
        })
}

pub struct MidtransGateway {
    config: MidtransConfig,
    http: PaymentHttpClient,
}

impl MidtransGateway {
    pub fn new(config: MidtransConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            Duration::from_secs(config.timeout_secs),
            config.status_max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MidtransConfig::from_env()?)
    }

    fn snap_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.snap_base_url.trim_end_matches('/'), path)
    }

    fn api_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl PaymentGateway for MidtransGateway {
    async fn create_transaction(
        &self,
        request: SnapTransactionRequest,
    ) -> PaymentResult<SnapTransaction> {
        if request.transaction_details.gross_amount <= 0 {
            return Err(PaymentError::ValidationError {
                message: "gross_amount must be greater than zero".to_string(),
                field: Some("gross_amount".to_string()),
            });
        }

        let payload = serde_json::to_value(&request).map_err(|e| PaymentError::ValidationError {
            message: format!("unable to encode transaction: {}", e),
            field: None,
        })?;

        let created: SnapTransaction = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.snap_endpoint("/transactions"),
                Some(&self.config.server_key),
                Some(&payload),
            )
            .await
            .map_err(|e| tag_provider(e, "midtrans"))?;

        info!(order_id = %request.order_id(), "snap transaction created");
        Ok(created)
    }

    async fn fetch_transaction_status(&self, order_id: &str) -> PaymentResult<AuthoritativeStatus> {
        let path = format!("/{}/status", order_id);
        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.api_endpoint(&path),
                Some(&self.config.server_key),
                None,
            )
            .await
            .map_err(|e| match e {
                PaymentError::ProviderError {
                    provider_code: Some(ref code),
                    ..
                } if code == "404" => PaymentError::TransactionNotFound {
                    order_id: order_id.to_string(),
                },
                other => tag_provider(other, "midtrans"),
            })?;

        debug!(order_id = %order_id, body = %raw, "status response received");
        parse_status_body(order_id, raw)
    }

    fn name(&self) -> &'static str {
        "midtrans"
    }
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    status_code: Option<String>,
    status_message: Option<String>,
    order_id: Option<String>,
    transaction_id: Option<String>,
    transaction_status: Option<String>,
    fraud_status: Option<String>,
    gross_amount: Option<JsonValue>,
}

/// The status API reports failures inside a 200 response via `status_code`.
fn parse_status_body(order_id: &str, raw: JsonValue) -> PaymentResult<AuthoritativeStatus> {
    let envelope: StatusEnvelope =
        serde_json::from_value(raw.clone()).map_err(|e| PaymentError::ProviderError {
            provider: "midtrans".to_string(),
            message: format!("unexpected status payload: {}", e),
            provider_code: None,
            retryable: false,
        })?;

    let status_code = envelope.status_code.clone().unwrap_or_default();
    match status_code.as_str() {
        "404" => {
            return Err(PaymentError::TransactionNotFound {
                order_id: order_id.to_string(),
            })
        }
        code if code.starts_with('5') => {
            return Err(PaymentError::ProviderError {
                provider: "midtrans".to_string(),
                message: envelope
                    .status_message
                    .unwrap_or_else(|| "gateway internal error".to_string()),
                provider_code: Some(status_code.clone()),
                retryable: true,
            })
        }
        _ => {}
    }

    let transaction_status = envelope
        .transaction_status
        .as_deref()
        .map(TransactionStatus::parse)
        .ok_or_else(|| PaymentError::ProviderError {
            provider: "midtrans".to_string(),
            message: envelope
                .status_message
                .clone()
                .unwrap_or_else(|| "status response without transaction_status".to_string()),
            provider_code: envelope.status_code.clone(),
            retryable: false,
        })?;

    let gross_amount = match envelope.gross_amount.as_ref() {
        Some(value) => gross_amount_from_json(value)?,
        None => 0,
    };

    Ok(AuthoritativeStatus {
        order_id: envelope.order_id.unwrap_or_else(|| order_id.to_string()),
        transaction_id: envelope.transaction_id,
        transaction_status,
        fraud_status: envelope.fraud_status.as_deref().map(FraudStatus::parse),
        gross_amount,
        status_code: envelope.status_code,
        raw,
    })
}

fn tag_provider(err: PaymentError, provider: &str) -> PaymentError {
    match err {
        PaymentError::ProviderError {
            message,
            provider_code,
            retryable,
            ..
        } => PaymentError::ProviderError {
            provider: provider.to_string(),
            message,
            provider_code,
            retryable,
        },
        other => other,
    }
}
