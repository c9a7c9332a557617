//! Process-local store with the same atomicity guarantees as the Postgres one.
//!
//! Orders and ledger entries share one lock, so a transition and its ledger
//! entry become visible together.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::ledger_repository::LedgerEntry;
use crate::database::order_repository::{NewOrder, Order, OrderStatus, StatusTransition};
use crate::database::repository::{IdempotencyLedger, OrderRepository};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct StoreState {
    orders: HashMap<String, Order>,
    ledger: HashMap<String, LedgerEntry>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, operation: &str) -> Result<MutexGuard<'_, StoreState>, DatabaseError> {
        self.state.lock().map_err(|_| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("store lock poisoned during {}", operation),
            })
        })
    }

    pub fn ledger_len(&self) -> Result<usize, DatabaseError> {
        Ok(self.lock("ledger_len")?.ledger.len())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn find_order(&self, order_id: &str) -> Result<Option<Order>, DatabaseError> {
        let state = self.lock("find_order")?;
        Ok(state.orders.get(order_id).cloned())
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, DatabaseError> {
        let mut state = self.lock("insert_order")?;
        if state.orders.contains_key(&order.order_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::DuplicateOrder {
                order_id: order.order_id,
            }));
        }

        let now = Utc::now();
        let created = Order {
            order_id: order.order_id.clone(),
            gross_amount: order.gross_amount,
            status: OrderStatus::Created,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(order.order_id, created.clone());
        Ok(created)
    }

    async fn apply_transition(&self, transition: &StatusTransition) -> Result<Order, DatabaseError> {
        let mut state = self.lock("apply_transition")?;

        let current_version = state
            .orders
            .get(&transition.order_id)
            .map(|o| o.version)
            .ok_or_else(|| {
                DatabaseError::new(DatabaseErrorKind::NotFound {
                    entity: "order".to_string(),
                    id: transition.order_id.clone(),
                })
            })?;

        if current_version != transition.expected_version {
            return Err(DatabaseError::new(DatabaseErrorKind::VersionConflict {
                order_id: transition.order_id.clone(),
                expected_version: transition.expected_version,
            }));
        }
        if state.ledger.contains_key(&transition.event_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::DuplicateEvent {
                event_id: transition.event_id.clone(),
            }));
        }

        state.ledger.insert(
            transition.event_id.clone(),
            LedgerEntry {
                event_id: transition.event_id.clone(),
                order_id: transition.order_id.clone(),
                applied_status: transition.to,
                applied_at: transition.applied_at,
            },
        );

        let order = state
            .orders
            .get_mut(&transition.order_id)
            .ok_or_else(|| {
                DatabaseError::new(DatabaseErrorKind::NotFound {
                    entity: "order".to_string(),
                    id: transition.order_id.clone(),
                })
            })?;
        order.status = transition.to;
        order.version += 1;
        order.updated_at = transition.applied_at;
        Ok(order.clone())
    }

    async fn discard_untouched_order(&self, order_id: &str) -> Result<bool, DatabaseError> {
        let mut state = self.lock("discard_untouched_order")?;
        let untouched = state
            .orders
            .get(order_id)
            .is_some_and(|o| o.status == OrderStatus::Created && o.version == 0)
            && !state.ledger.values().any(|e| e.order_id == order_id);
        if untouched {
            state.orders.remove(order_id);
        }
        Ok(untouched)
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryStore {
    async fn has_applied(&self, event_id: &str) -> Result<bool, DatabaseError> {
        let state = self.lock("has_applied")?;
        Ok(state.ledger.contains_key(event_id))
    }

    async fn record_applied(&self, entry: &LedgerEntry) -> Result<(), DatabaseError> {
        let mut state = self.lock("record_applied")?;
        if state.ledger.contains_key(&entry.event_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::DuplicateEvent {
                event_id: entry.event_id.clone(),
            }));
        }
        state.ledger.insert(entry.event_id.clone(), entry.clone());
        Ok(())
    }

    async fn find_entry(&self, event_id: &str) -> Result<Option<LedgerEntry>, DatabaseError> {
        let state = self.lock("find_entry")?;
        Ok(state.ledger.get(event_id).cloned())
    }

    async fn entries_for_order(&self, order_id: &str) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let state = self.lock("entries_for_order")?;
        let mut entries: Vec<LedgerEntry> = state
            .ledger
            .values()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.applied_at);
        Ok(entries)
    }
}
