//! Scriptable in-process gateway for unit and integration tests.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    AuthoritativeStatus, FraudStatus, SnapTransaction, SnapTransactionRequest, TransactionStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

#[derive(Default)]
pub struct MockGateway {
    statuses: Mutex<HashMap<String, PaymentResult<AuthoritativeStatus>>>,
    created: Mutex<Vec<SnapTransactionRequest>>,
    fail_creation: Mutex<Option<PaymentError>>,
    status_calls: AtomicUsize,
    status_barrier: Mutex<Option<(Arc<Barrier>, usize)>>,
    status_delay: Mutex<Option<Duration>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the status reported for `order_id`.
    pub fn set_status(
        &self,
        order_id: &str,
        status: TransactionStatus,
        fraud: Option<FraudStatus>,
        gross_amount: i64,
    ) {
        let entry = AuthoritativeStatus {
            order_id: order_id.to_string(),
            transaction_id: Some(format!("mock-{}", order_id)),
            transaction_status: status,
            fraud_status: fraud,
            gross_amount,
            status_code: Some("200".to_string()),
            raw: serde_json::json!({
                "order_id": order_id,
                "transaction_status": status.as_str(),
                "fraud_status": fraud.map(|f| f.as_str()),
                "gross_amount": format!("{}.00", gross_amount),
            }),
        };
        self.lock_statuses().insert(order_id.to_string(), Ok(entry));
    }

    pub fn set_error(&self, order_id: &str, error: PaymentError) {
        self.lock_statuses().insert(order_id.to_string(), Err(error));
    }

    pub fn fail_creation_with(&self, error: PaymentError) {
        if let Ok(mut slot) = self.fail_creation.lock() {
            *slot = Some(error);
        }
    }

    pub fn clear_creation_failure(&self) {
        if let Ok(mut slot) = self.fail_creation.lock() {
            *slot = None;
        }
    }

    /// The next `parties` status queries wait for each other before answering;
    /// later queries answer immediately.
    pub fn hold_status_queries(&self, parties: usize) {
        if let Ok(mut slot) = self.status_barrier.lock() {
            *slot = Some((Arc::new(Barrier::new(parties)), parties));
        }
    }

    pub fn delay_status_queries(&self, delay: Duration) {
        if let Ok(mut slot) = self.status_delay.lock() {
            *slot = Some(delay);
        }
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn created_transactions(&self) -> Vec<SnapTransactionRequest> {
        self.created.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn lock_statuses(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, PaymentResult<AuthoritativeStatus>>> {
        self.statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_transaction(
        &self,
        request: SnapTransactionRequest,
    ) -> PaymentResult<SnapTransaction> {
        if let Some(err) = self.fail_creation.lock().ok().and_then(|slot| slot.clone()) {
            return Err(err);
        }
        let order_id = request.order_id().to_string();
        if let Ok(mut created) = self.created.lock() {
            created.push(request);
        }
        Ok(SnapTransaction {
            token: format!("mock-token-{}", order_id),
            redirect_url: format!("https://mock.gateway/snap/{}", order_id),
        })
    }

    async fn fetch_transaction_status(&self, order_id: &str) -> PaymentResult<AuthoritativeStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        let barrier = self.status_barrier.lock().ok().and_then(|mut slot| {
            let (barrier, remaining) = slot.take()?;
            if remaining > 1 {
                *slot = Some((barrier.clone(), remaining - 1));
            }
            Some(barrier)
        });
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        let delay = self.status_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.lock_statuses()
            .get(order_id)
            .cloned()
            .unwrap_or_else(|| {
                Err(PaymentError::TransactionNotFound {
                    order_id: order_id.to_string(),
                })
            })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
