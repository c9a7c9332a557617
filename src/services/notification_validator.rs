//! Turns an untrusted gateway callback into a [`NotificationEvent`].

use chrono::Utc;
use serde_json::{Map, Value as JsonValue};
use tracing::warn;

use crate::payments::utils::verify_notification_signature;
use crate::services::notification_event::{NotificationEvent, ReconcileError};

pub const MAX_ORDER_ID_LEN: usize = 50;

/// Order ids are 1..=50 chars of `[A-Za-z0-9-_.~]`.
pub fn is_valid_order_id(order_id: &str) -> bool {
    !order_id.is_empty()
        && order_id.len() <= MAX_ORDER_ID_LEN
        && order_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'))
}

#[derive(Clone)]
pub struct NotificationValidator {
    server_key: String,
    require_signature: bool,
}

impl NotificationValidator {
    pub fn new(server_key: impl Into<String>, require_signature: bool) -> Self {
        Self {
            server_key: server_key.into(),
            require_signature,
        }
    }

    pub fn validate(&self, payload: &JsonValue) -> Result<NotificationEvent, ReconcileError> {
        let body = payload.as_object().ok_or_else(|| {
            ReconcileError::InvalidPayload("notification body must be a JSON object".to_string())
        })?;

        let order_id = string_field(body, "order_id")
            .ok_or_else(|| ReconcileError::InvalidPayload("order_id is required".to_string()))?;
        if !is_valid_order_id(&order_id) {
            return Err(ReconcileError::InvalidPayload(format!(
                "order_id is malformed: {:?}",
                order_id
            )));
        }

        let vendor_status = string_field(body, "transaction_status").ok_or_else(|| {
            ReconcileError::InvalidPayload("transaction_status is required".to_string())
        })?;

        let status_code = string_field(body, "status_code");
        let gross_amount = string_field(body, "gross_amount");
        let fraud_status = string_field(body, "fraud_status");
        let transaction_id = string_field(body, "transaction_id");

        match string_field(body, "signature_key") {
            Some(signature) => {
                let (Some(code), Some(amount)) = (status_code.as_deref(), gross_amount.as_deref())
                else {
                    return Err(ReconcileError::AuthenticationFailed(
                        "signed notification lacks status_code or gross_amount".to_string(),
                    ));
                };
                if !verify_notification_signature(
                    &order_id,
                    code,
                    amount,
                    &self.server_key,
                    &signature,
                ) {
                    warn!(order_id = %order_id, "notification signature mismatch");
                    return Err(ReconcileError::AuthenticationFailed(
                        "signature_key does not match".to_string(),
                    ));
                }
            }
            None if self.require_signature => {
                return Err(ReconcileError::AuthenticationFailed(
                    "signature_key is required".to_string(),
                ));
            }
            None => {}
        }

        let event_id = string_field(body, "notification_id")
            .or_else(|| string_field(body, "event_id"))
            .unwrap_or_else(|| {
                derive_event_id(
                    transaction_id.as_deref().unwrap_or(&order_id),
                    &vendor_status,
                    fraud_status.as_deref(),
                )
            });

        Ok(NotificationEvent {
            event_id,
            order_id,
            transaction_id,
            vendor_status,
            fraud_status,
            status_code,
            gross_amount,
            received_at: Utc::now(),
        })
    }
}

/// Redeliveries of the same notification map to the same id.
pub fn derive_event_id(subject: &str, vendor_status: &str, fraud_status: Option<&str>) -> String {
    format!(
        "{}:{}:{}",
        subject,
        vendor_status.trim().to_lowercase(),
        fraud_status.map(|f| f.trim().to_lowercase()).unwrap_or_else(|| "-".to_string())
    )
}

/// Strings are taken as-is; numbers are accepted and rendered as sent.
fn string_field(body: &Map<String, JsonValue>, key: &str) -> Option<String> {
    match body.get(key)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::utils::notification_signature;
    use serde_json::json;

    const KEY: &str = "SB-Mid-server-test";

    fn signed(order_id: &str, status: &str) -> JsonValue {
        json!({
            "order_id": order_id,
            "transaction_id": "trx-1",
            "transaction_status": status,
            "fraud_status": "accept",
            "status_code": "200",
            "gross_amount": "150000.00",
            "signature_key": notification_signature(order_id, "200", "150000.00", KEY),
        })
    }

    #[test]
    fn valid_signed_notification_is_accepted() {
        let validator = NotificationValidator::new(KEY, true);
        let event = validator.validate(&signed("ORD-1", "settlement")).unwrap();
        assert_eq!(event.order_id, "ORD-1");
        assert_eq!(event.vendor_status, "settlement");
        assert_eq!(event.event_id, "trx-1:settlement:accept");
    }

    #[test]
    fn tampered_notification_fails_authentication() {
        let validator = NotificationValidator::new(KEY, false);
        let mut payload = signed("ORD-1", "settlement");
        payload["gross_amount"] = json!("1.00");
        assert!(matches!(
            validator.validate(&payload),
            Err(ReconcileError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn unsigned_notification_depends_on_policy() {
        let payload = json!({ "order_id": "ORD-1", "transaction_status": "pending" });
        let lenient = NotificationValidator::new(KEY, false);
        let event = lenient.validate(&payload).unwrap();
        assert_eq!(event.event_id, "ORD-1:pending:-");

        let strict = NotificationValidator::new(KEY, true);
        assert!(matches!(
            strict.validate(&payload),
            Err(ReconcileError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn missing_or_malformed_order_id_is_invalid() {
        let validator = NotificationValidator::new(KEY, false);
        for payload in [
            json!({ "transaction_status": "pending" }),
            json!({ "order_id": "", "transaction_status": "pending" }),
            json!({ "order_id": "ORD 1; DROP", "transaction_status": "pending" }),
            json!({ "order_id": "x".repeat(51), "transaction_status": "pending" }),
            json!({ "order_id": "ORD-1" }),
            json!(["ORD-1"]),
        ] {
            assert!(
                matches!(
                    validator.validate(&payload),
                    Err(ReconcileError::InvalidPayload(_))
                ),
                "payload should be rejected: {}",
                payload
            );
        }
    }

    #[test]
    fn explicit_notification_id_wins() {
        let validator = NotificationValidator::new(KEY, false);
        let payload = json!({
            "order_id": "ORD-1",
            "transaction_status": "settlement",
            "notification_id": "ntf-42"
        });
        assert_eq!(validator.validate(&payload).unwrap().event_id, "ntf-42");
    }
}
