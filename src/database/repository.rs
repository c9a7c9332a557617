use crate::database::error::DatabaseError;
use crate::database::ledger_repository::LedgerEntry;
use crate::database::order_repository::{NewOrder, Order, StatusTransition};
use async_trait::async_trait;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_order(&self, order_id: &str) -> Result<Option<Order>, DatabaseError>;

    /// Fails with `DuplicateOrder` if the identifier is taken.
    async fn insert_order(&self, order: NewOrder) -> Result<Order, DatabaseError>;

    /// Atomically: check the version, set the status, bump the version and
    /// write the ledger entry. Fails with `VersionConflict` or `DuplicateEvent`
    /// without changing anything.
    async fn apply_transition(&self, transition: &StatusTransition) -> Result<Order, DatabaseError>;

    /// Delete the order only while it is still `Created` at version 0, i.e. no
    /// notification has touched it. Returns whether a row was removed.
    async fn discard_untouched_order(&self, order_id: &str) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    async fn has_applied(&self, event_id: &str) -> Result<bool, DatabaseError>;

    /// Fails with `DuplicateEvent` if an entry already exists.
    async fn record_applied(&self, entry: &LedgerEntry) -> Result<(), DatabaseError>;

    async fn find_entry(&self, event_id: &str) -> Result<Option<LedgerEntry>, DatabaseError>;

    async fn entries_for_order(&self, order_id: &str) -> Result<Vec<LedgerEntry>, DatabaseError>;
}
