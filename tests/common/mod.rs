//! Shared fixtures: an in-memory store, a scriptable gateway and the services
//! wired the way `main` wires them.

#![allow(dead_code)]

use axum::Router;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use kuycountry_backend::api::{self, webhooks::WebhookState, AppState};
use kuycountry_backend::database::in_memory::InMemoryStore;
use kuycountry_backend::database::order_repository::NewOrder;
use kuycountry_backend::database::repository::OrderRepository;
use kuycountry_backend::health::HealthChecker;
use kuycountry_backend::payments::providers::MockGateway;
use kuycountry_backend::services::{
    NotificationEvent, NotificationValidator, OrderReconciler, ReconcilerConfig,
    StatusQueryClient, TransactionService,
};

pub const SERVER_KEY: &str = "SB-Mid-server-integration";

pub struct Harness {
    pub store: InMemoryStore,
    pub gateway: Arc<MockGateway>,
    pub reconciler: Arc<OrderReconciler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ReconcilerConfig::default())
    }

    pub fn with_config(config: ReconcilerConfig) -> Self {
        let store = InMemoryStore::new();
        let gateway = Arc::new(MockGateway::new());
        let reconciler = Arc::new(OrderReconciler::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            StatusQueryClient::new(gateway.clone(), Duration::from_secs(2)),
            config,
        ));
        Self {
            store,
            gateway,
            reconciler,
        }
    }

    pub async fn seed_order(&self, order_id: &str, gross_amount: i64) {
        self.store
            .insert_order(NewOrder {
                order_id: order_id.to_string(),
                gross_amount,
            })
            .await
            .expect("seeding order should succeed");
    }

    /// Router with the given notification deadline.
    pub fn app(&self, notification_timeout: Duration, require_signature: bool) -> Router {
        api::router(AppState {
            transactions: Arc::new(TransactionService::new(
                self.gateway.clone(),
                Arc::new(self.store.clone()),
            )),
            notifications: Arc::new(WebhookState {
                validator: NotificationValidator::new(SERVER_KEY, require_signature),
                reconciler: self.reconciler.clone(),
                timeout: notification_timeout,
            }),
            health_checker: HealthChecker::new(None),
        })
    }
}

pub fn event(order_id: &str, vendor_status: &str, event_id: &str) -> NotificationEvent {
    NotificationEvent {
        event_id: event_id.to_string(),
        order_id: order_id.to_string(),
        transaction_id: None,
        vendor_status: vendor_status.to_string(),
        fraud_status: None,
        status_code: Some("200".to_string()),
        gross_amount: None,
        received_at: Utc::now(),
    }
}
