//! Order State Reconciler
//!
//! Applies gateway notifications to local orders. A callback only triggers a
//! status re-query; the transition is decided from the gateway's answer, and is
//! written together with its ledger entry under an optimistic version check.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::ledger_repository::LedgerEntry;
use crate::database::order_repository::{NewOrder, Order, OrderStatus, StatusTransition};
use crate::database::repository::{IdempotencyLedger, OrderRepository};
use crate::payments::types::{AuthoritativeStatus, FraudStatus, TransactionStatus};
use crate::services::notification_event::{NotificationEvent, ReconcileError};
use crate::services::status_query::StatusQueryClient;

#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Create a local order from the gateway's record when a callback names an
    /// unknown order, instead of rejecting it.
    pub create_missing_orders: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied {
        from: OrderStatus,
        to: OrderStatus,
        version: i64,
    },
    Unchanged {
        status: OrderStatus,
    },
    AlreadyProcessed,
    Rejected {
        current: OrderStatus,
        reason: String,
    },
}

/// Local status implied by the gateway's status and fraud verdict.
pub fn target_status(
    status: TransactionStatus,
    fraud: Option<FraudStatus>,
) -> Option<OrderStatus> {
    match status {
        TransactionStatus::Pending | TransactionStatus::Authorize => Some(OrderStatus::Pending),
        TransactionStatus::Settlement => Some(OrderStatus::Paid),
        TransactionStatus::Capture => match fraud {
            None | Some(FraudStatus::Accept) => Some(OrderStatus::Paid),
            Some(FraudStatus::Challenge) => Some(OrderStatus::PendingReview),
            Some(FraudStatus::Deny) => Some(OrderStatus::Denied),
            Some(FraudStatus::Unknown) => None,
        },
        TransactionStatus::Expire => Some(OrderStatus::Expired),
        TransactionStatus::Cancel => Some(OrderStatus::Cancelled),
        TransactionStatus::Deny | TransactionStatus::Failure => Some(OrderStatus::Denied),
        TransactionStatus::Refund | TransactionStatus::PartialRefund => {
            Some(OrderStatus::Refunded)
        }
        TransactionStatus::Unknown => None,
    }
}

/// Whether `from -> to` is a permitted move. Terminal states never move
/// backward; a paid order may only be refunded.
pub fn check_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    matches!(
        (from, to),
        (Created, Pending)
            | (Created | Pending, PendingReview)
            | (
                Created | Pending | PendingReview,
                Paid | Expired | Cancelled | Denied
            )
            | (Paid, Refunded)
    )
}

pub struct OrderReconciler {
    orders: Arc<dyn OrderRepository>,
    ledger: Arc<dyn IdempotencyLedger>,
    status_client: StatusQueryClient,
    config: ReconcilerConfig,
}

impl OrderReconciler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        ledger: Arc<dyn IdempotencyLedger>,
        status_client: StatusQueryClient,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            orders,
            ledger,
            status_client,
            config,
        }
    }

    /// Handle one notification. Duplicates and rejected transitions are
    /// successful outcomes; errors are either terminal for this event or ask the
    /// gateway to redeliver (see [`ReconcileError::is_retryable`]).
    pub async fn reconcile(
        &self,
        event: &NotificationEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let result = match self.attempt(event).await {
            Err(ReconcileError::ConcurrentUpdateConflict { order_id }) => {
                warn!(
                    order_id = %order_id,
                    event_id = %event.event_id,
                    "order changed concurrently, retrying once"
                );
                self.attempt(event).await
            }
            other => other,
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(ReconcileError::DuplicateEvent { event_id }) => {
                info!(
                    event_id = %event_id,
                    order_id = %event.order_id,
                    "notification already processed"
                );
                Ok(ReconcileOutcome::AlreadyProcessed)
            }
            Err(ReconcileError::InvalidTransition {
                from,
                to,
                vendor_status,
            }) => {
                warn!(
                    order_id = %event.order_id,
                    event_id = %event.event_id,
                    from = %from,
                    to = to.map(|s| s.as_str()).unwrap_or("-"),
                    vendor_status = %vendor_status,
                    "transition rejected"
                );
                Ok(ReconcileOutcome::Rejected {
                    current: from,
                    reason: format!(
                        "transition from {} on gateway status {} is not allowed",
                        from, vendor_status
                    ),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn attempt(&self, event: &NotificationEvent) -> Result<ReconcileOutcome, ReconcileError> {
        let (order, prefetched) = self.load_order(event).await?;

        if self.ledger.has_applied(&event.event_id).await? {
            return Err(ReconcileError::DuplicateEvent {
                event_id: event.event_id.clone(),
            });
        }

        let authoritative = match prefetched {
            Some(status) => status,
            None => {
                self.status_client
                    .fetch_authoritative_status(&order.order_id)
                    .await?
            }
        };

        let confirmed = event
            .vendor_status
            .eq_ignore_ascii_case(authoritative.transaction_status.as_str());
        if !confirmed {
            warn!(
                order_id = %order.order_id,
                event_id = %event.event_id,
                claimed = %event.vendor_status,
                authoritative = %authoritative.transaction_status,
                "callback status differs from gateway status"
            );
        }
        let entry_key = ledger_key(event, &authoritative, confirmed);

        let target = target_status(authoritative.transaction_status, authoritative.fraud_status)
            .ok_or_else(|| ReconcileError::InvalidTransition {
                from: order.status,
                to: None,
                vendor_status: authoritative.transaction_status.as_str().to_string(),
            })?;

        if target == order.status {
            self.ledger
                .record_applied(&LedgerEntry {
                    event_id: entry_key,
                    order_id: order.order_id.clone(),
                    applied_status: target,
                    applied_at: Utc::now(),
                })
                .await
                .map_err(|e| map_store_error(e, event))?;
            info!(
                order_id = %order.order_id,
                event_id = %event.event_id,
                status = %target,
                "order already in gateway status"
            );
            return Ok(ReconcileOutcome::Unchanged { status: target });
        }

        if !check_transition(order.status, target) {
            return Err(ReconcileError::InvalidTransition {
                from: order.status,
                to: Some(target),
                vendor_status: authoritative.transaction_status.as_str().to_string(),
            });
        }

        if target == OrderStatus::Paid && authoritative.gross_amount != order.gross_amount {
            warn!(
                order_id = %order.order_id,
                event_id = %event.event_id,
                expected = order.gross_amount,
                reported = authoritative.gross_amount,
                "gross amount mismatch, refusing to mark order paid"
            );
            return Ok(ReconcileOutcome::Rejected {
                current: order.status,
                reason: format!(
                    "gateway amount {} does not match order amount {}",
                    authoritative.gross_amount, order.gross_amount
                ),
            });
        }

        let updated = self
            .orders
            .apply_transition(&StatusTransition {
                order_id: order.order_id.clone(),
                expected_version: order.version,
                to: target,
                event_id: entry_key,
                applied_at: Utc::now(),
            })
            .await
            .map_err(|e| map_store_error(e, event))?;

        info!(
            order_id = %updated.order_id,
            event_id = %event.event_id,
            from = %order.status,
            to = %updated.status,
            version = updated.version,
            "order transitioned"
        );

        Ok(ReconcileOutcome::Applied {
            from: order.status,
            to: updated.status,
            version: updated.version,
        })
    }

    /// Returns the order and, when it had to be created from the gateway's
    /// record, the status fetched for that purpose.
    async fn load_order(
        &self,
        event: &NotificationEvent,
    ) -> Result<(Order, Option<AuthoritativeStatus>), ReconcileError> {
        if let Some(order) = self.orders.find_order(&event.order_id).await? {
            return Ok((order, None));
        }

        if !self.config.create_missing_orders {
            warn!(
                order_id = %event.order_id,
                event_id = %event.event_id,
                "notification for unknown order"
            );
            return Err(ReconcileError::OrderNotFound {
                order_id: event.order_id.clone(),
            });
        }

        let authoritative = self
            .status_client
            .fetch_authoritative_status(&event.order_id)
            .await?;
        if authoritative.gross_amount <= 0 {
            return Err(ReconcileError::UpstreamUnavailable {
                message: format!(
                    "gateway reported no usable amount for order {}",
                    event.order_id
                ),
            });
        }

        let order = match self
            .orders
            .insert_order(NewOrder {
                order_id: event.order_id.clone(),
                gross_amount: authoritative.gross_amount,
            })
            .await
        {
            Ok(order) => {
                info!(
                    order_id = %order.order_id,
                    gross_amount = order.gross_amount,
                    "created order from gateway record"
                );
                order
            }
            Err(DatabaseError {
                kind: DatabaseErrorKind::DuplicateOrder { .. },
            }) => self
                .orders
                .find_order(&event.order_id)
                .await?
                .ok_or_else(|| ReconcileError::OrderNotFound {
                    order_id: event.order_id.clone(),
                })?,
            Err(e) => return Err(e.into()),
        };

        Ok((order, Some(authoritative)))
    }
}

/// Ledger key for what was actually applied. A callback whose claimed status
/// the gateway did not confirm is recorded under a key qualified by the
/// confirmed status, so a redelivery of that callback is verified again.
fn ledger_key(
    event: &NotificationEvent,
    authoritative: &AuthoritativeStatus,
    confirmed: bool,
) -> String {
    if confirmed {
        event.event_id.clone()
    } else {
        format!(
            "{}@{}",
            event.event_id,
            authoritative.transaction_status.as_str()
        )
    }
}

fn map_store_error(err: DatabaseError, event: &NotificationEvent) -> ReconcileError {
    match err.kind {
        DatabaseErrorKind::DuplicateEvent { event_id } => {
            ReconcileError::DuplicateEvent { event_id }
        }
        DatabaseErrorKind::VersionConflict { order_id, .. } => {
            ReconcileError::ConcurrentUpdateConflict { order_id }
        }
        _ => {
            error!(
                order_id = %event.order_id,
                event_id = %event.event_id,
                error = %err,
                "failed to persist transition"
            );
            ReconcileError::Storage(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::in_memory::InMemoryStore;
    use crate::payments::providers::MockGateway;
    use std::time::Duration;

    const ALL: [OrderStatus; 8] = [
        OrderStatus::Created,
        OrderStatus::Pending,
        OrderStatus::PendingReview,
        OrderStatus::Paid,
        OrderStatus::Expired,
        OrderStatus::Cancelled,
        OrderStatus::Denied,
        OrderStatus::Refunded,
    ];

    #[test]
    fn target_mapping_follows_gateway_semantics() {
        assert_eq!(
            target_status(TransactionStatus::Settlement, None),
            Some(OrderStatus::Paid)
        );
        assert_eq!(
            target_status(TransactionStatus::Capture, Some(FraudStatus::Accept)),
            Some(OrderStatus::Paid)
        );
        assert_eq!(
            target_status(TransactionStatus::Capture, Some(FraudStatus::Challenge)),
            Some(OrderStatus::PendingReview)
        );
        assert_eq!(
            target_status(TransactionStatus::Expire, None),
            Some(OrderStatus::Expired)
        );
        assert_eq!(
            target_status(TransactionStatus::Refund, None),
            Some(OrderStatus::Refunded)
        );
        assert_eq!(target_status(TransactionStatus::Unknown, None), None);
    }

    #[test]
    fn terminal_states_never_move_except_refund() {
        for from in ALL.iter().copied().filter(|s| s.is_terminal()) {
            for to in ALL {
                let allowed = check_transition(from, to);
                if from == OrderStatus::Paid && to == OrderStatus::Refunded {
                    assert!(allowed);
                } else {
                    assert!(!allowed, "{} -> {} must be rejected", from, to);
                }
            }
        }
    }

    #[test]
    fn open_states_follow_table() {
        assert!(check_transition(OrderStatus::Created, OrderStatus::Pending));
        assert!(check_transition(OrderStatus::Pending, OrderStatus::Paid));
        assert!(check_transition(OrderStatus::Created, OrderStatus::Expired));
        assert!(check_transition(OrderStatus::PendingReview, OrderStatus::Denied));
        assert!(!check_transition(OrderStatus::Pending, OrderStatus::Created));
        assert!(!check_transition(OrderStatus::PendingReview, OrderStatus::Pending));
        assert!(!check_transition(OrderStatus::Pending, OrderStatus::Refunded));
    }

    fn event(order_id: &str, status: &str, event_id: &str) -> NotificationEvent {
        NotificationEvent {
            event_id: event_id.to_string(),
            order_id: order_id.to_string(),
            transaction_id: None,
            vendor_status: status.to_string(),
            fraud_status: None,
            status_code: None,
            gross_amount: None,
            received_at: Utc::now(),
        }
    }

    fn reconciler(
        store: &InMemoryStore,
        gateway: Arc<MockGateway>,
        config: ReconcilerConfig,
    ) -> OrderReconciler {
        OrderReconciler::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            StatusQueryClient::new(gateway, Duration::from_secs(5)),
            config,
        )
    }

    #[tokio::test]
    async fn unknown_order_is_rejected_without_creation() {
        let store = InMemoryStore::new();
        let gateway = Arc::new(MockGateway::new());
        gateway.set_status("ORD-404", TransactionStatus::Settlement, None, 1000);
        let reconciler = reconciler(&store, gateway.clone(), ReconcilerConfig::default());

        let err = reconciler
            .reconcile(&event("ORD-404", "settlement", "e1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::OrderNotFound { .. }));
        assert!(store.find_order("ORD-404").await.unwrap().is_none());
        assert_eq!(gateway.status_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_order_is_created_when_enabled() {
        let store = InMemoryStore::new();
        let gateway = Arc::new(MockGateway::new());
        gateway.set_status("ORD-NEW", TransactionStatus::Settlement, None, 2500);
        let reconciler = reconciler(
            &store,
            gateway.clone(),
            ReconcilerConfig {
                create_missing_orders: true,
            },
        );

        let outcome = reconciler
            .reconcile(&event("ORD-NEW", "settlement", "e1"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                from: OrderStatus::Created,
                to: OrderStatus::Paid,
                version: 1
            }
        );
        assert_eq!(gateway.status_calls(), 1);
        let order = store.find_order("ORD-NEW").await.unwrap().unwrap();
        assert_eq!(order.gross_amount, 2500);
    }

    #[tokio::test]
    async fn same_status_records_ledger_without_transition() {
        let store = InMemoryStore::new();
        store
            .insert_order(NewOrder {
                order_id: "ORD-1".to_string(),
                gross_amount: 1000,
            })
            .await
            .unwrap();
        let gateway = Arc::new(MockGateway::new());
        gateway.set_status("ORD-1", TransactionStatus::Pending, None, 1000);
        let reconciler = reconciler(&store, gateway.clone(), ReconcilerConfig::default());

        let first = reconciler
            .reconcile(&event("ORD-1", "pending", "p1"))
            .await
            .unwrap();
        assert!(matches!(first, ReconcileOutcome::Applied { .. }));

        let second = reconciler
            .reconcile(&event("ORD-1", "pending", "p2"))
            .await
            .unwrap();
        assert_eq!(
            second,
            ReconcileOutcome::Unchanged {
                status: OrderStatus::Pending
            }
        );
        assert!(store.has_applied("p2").await.unwrap());

        let order = store.find_order("ORD-1").await.unwrap().unwrap();
        assert_eq!(order.version, 1);

        let replay = reconciler
            .reconcile(&event("ORD-1", "pending", "p2"))
            .await
            .unwrap();
        assert_eq!(replay, ReconcileOutcome::AlreadyProcessed);
        assert_eq!(gateway.status_calls(), 2);
    }

    #[tokio::test]
    async fn amount_mismatch_blocks_payment() {
        let store = InMemoryStore::new();
        store
            .insert_order(NewOrder {
                order_id: "ORD-1".to_string(),
                gross_amount: 1000,
            })
            .await
            .unwrap();
        let gateway = Arc::new(MockGateway::new());
        gateway.set_status("ORD-1", TransactionStatus::Settlement, None, 1);
        let reconciler = reconciler(&store, gateway, ReconcilerConfig::default());

        let outcome = reconciler
            .reconcile(&event("ORD-1", "settlement", "s1"))
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Rejected { .. }));
        let order = store.find_order("ORD-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Created);
        assert!(!store.has_applied("s1").await.unwrap());
    }

    #[tokio::test]
    async fn unmapped_gateway_status_is_rejected() {
        let store = InMemoryStore::new();
        store
            .insert_order(NewOrder {
                order_id: "ORD-1".to_string(),
                gross_amount: 1000,
            })
            .await
            .unwrap();
        let gateway = Arc::new(MockGateway::new());
        gateway.set_status("ORD-1", TransactionStatus::Unknown, None, 1000);
        let reconciler = reconciler(&store, gateway, ReconcilerConfig::default());

        let outcome = reconciler
            .reconcile(&event("ORD-1", "weird", "w1"))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ReconcileOutcome::Rejected {
                current: OrderStatus::Created,
                ..
            }
        ));
    }
}
