use crate::payments::error::{PaymentError, PaymentResult};
use rust_decimal::prelude::{ToPrimitive, Zero};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Transaction status as reported by the gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Authorize,
    Capture,
    Settlement,
    Deny,
    Cancel,
    Expire,
    Failure,
    Refund,
    PartialRefund,
    #[serde(other)]
    Unknown,
}

impl TransactionStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "pending" => TransactionStatus::Pending,
            "authorize" => TransactionStatus::Authorize,
            "capture" => TransactionStatus::Capture,
            "settlement" => TransactionStatus::Settlement,
            "deny" => TransactionStatus::Deny,
            "cancel" => TransactionStatus::Cancel,
            "expire" => TransactionStatus::Expire,
            "failure" => TransactionStatus::Failure,
            "refund" => TransactionStatus::Refund,
            "partial_refund" => TransactionStatus::PartialRefund,
            _ => TransactionStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Authorize => "authorize",
            TransactionStatus::Capture => "capture",
            TransactionStatus::Settlement => "settlement",
            TransactionStatus::Deny => "deny",
            TransactionStatus::Cancel => "cancel",
            TransactionStatus::Expire => "expire",
            TransactionStatus::Failure => "failure",
            TransactionStatus::Refund => "refund",
            TransactionStatus::PartialRefund => "partial_refund",
            TransactionStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fraud detection verdict attached to card captures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FraudStatus {
    Accept,
    Challenge,
    Deny,
    #[serde(other)]
    Unknown,
}

impl FraudStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "accept" => FraudStatus::Accept,
            "challenge" => FraudStatus::Challenge,
            "deny" => FraudStatus::Deny,
            _ => FraudStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FraudStatus::Accept => "accept",
            FraudStatus::Challenge => "challenge",
            FraudStatus::Deny => "deny",
            FraudStatus::Unknown => "unknown",
        }
    }
}

/// Result of querying the gateway directly for a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthoritativeStatus {
    pub order_id: String,
    pub transaction_id: Option<String>,
    pub transaction_status: TransactionStatus,
    pub fraud_status: Option<FraudStatus>,
    pub gross_amount: i64,
    pub status_code: Option<String>,
    pub raw: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionDetails {
    pub order_id: String,
    pub gross_amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreditCardOptions {
    pub secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerDetails {
    pub first_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemDetail {
    pub id: String,
    pub price: i64,
    pub quantity: i64,
    pub name: String,
}

/// Snap transaction parameters, shaped the way the gateway expects them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapTransactionRequest {
    pub transaction_details: TransactionDetails,
    pub credit_card: CreditCardOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_details: Option<CustomerDetails>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub item_details: Vec<ItemDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_field1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_field2: Option<String>,
}

impl SnapTransactionRequest {
    pub fn new(order_id: impl Into<String>, gross_amount: i64) -> Self {
        Self {
            transaction_details: TransactionDetails {
                order_id: order_id.into(),
                gross_amount,
            },
            credit_card: CreditCardOptions { secure: true },
            customer_details: None,
            item_details: Vec::new(),
            custom_field1: None,
            custom_field2: None,
        }
    }

    pub fn order_id(&self) -> &str {
        &self.transaction_details.order_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapTransaction {
    pub token: String,
    pub redirect_url: String,
}

/// Parse a gateway amount string such as `"150000.00"` into whole units.
///
/// Fractional amounts are rejected; the gateway only settles whole rupiah.
pub fn parse_gross_amount(value: &str) -> PaymentResult<i64> {
    let invalid = || PaymentError::ValidationError {
        message: format!("invalid gross amount: {}", value),
        field: Some("gross_amount".to_string()),
    };

    let parsed = Decimal::from_str(value.trim()).map_err(|_| invalid())?;
    if !parsed.fract().is_zero() {
        return Err(invalid());
    }
    parsed.trunc().to_i64().ok_or_else(invalid)
}

/// Accept either a JSON number or a numeric string, as the gateway mixes both.
pub fn gross_amount_from_json(value: &JsonValue) -> PaymentResult<i64> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .map(Ok)
            .unwrap_or_else(|| parse_gross_amount(&n.to_string())),
        JsonValue::String(s) => parse_gross_amount(s),
        _ => Err(PaymentError::ValidationError {
            message: "gross_amount must be a number or numeric string".to_string(),
            field: Some("gross_amount".to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snap_request_serializes_to_gateway_schema() {
        let mut request = SnapTransactionRequest::new("ORD-1", 150000);
        request.custom_field1 = Some("gold".to_string());
        let json = serde_json::to_value(&request).expect("serialization should succeed");

        assert_eq!(json["transaction_details"]["order_id"], "ORD-1");
        assert_eq!(json["transaction_details"]["gross_amount"], 150000);
        assert_eq!(json["credit_card"]["secure"], true);
        assert_eq!(json["custom_field1"], "gold");
        assert!(json.get("customer_details").is_none());
        assert!(json.get("item_details").is_none());
    }

    #[test]
    fn vendor_status_strings_are_parsed() {
        assert_eq!(
            TransactionStatus::parse("settlement"),
            TransactionStatus::Settlement
        );
        assert_eq!(
            TransactionStatus::parse(" Partial_Refund "),
            TransactionStatus::PartialRefund
        );
        assert_eq!(TransactionStatus::parse("bogus"), TransactionStatus::Unknown);
        assert_eq!(FraudStatus::parse("challenge"), FraudStatus::Challenge);
    }

    #[test]
    fn gross_amount_parsing() {
        assert_eq!(parse_gross_amount("150000.00").unwrap(), 150000);
        assert_eq!(parse_gross_amount("42").unwrap(), 42);
        assert!(parse_gross_amount("10.50").is_err());
        assert!(parse_gross_amount("abc").is_err());
        assert_eq!(
            gross_amount_from_json(&serde_json::json!("2500.00")).unwrap(),
            2500
        );
        assert_eq!(gross_amount_from_json(&serde_json::json!(2500)).unwrap(), 2500);
        assert!(gross_amount_from_json(&serde_json::json!(null)).is_err());
    }
}
