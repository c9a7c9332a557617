use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::order_repository::OrderStatus;
use crate::database::repository::IdempotencyLedger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

/// Record that a notification event has been applied to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub event_id: String,
    pub order_id: String,
    pub applied_status: OrderStatus,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct LedgerRow {
    event_id: String,
    order_id: String,
    applied_status: String,
    applied_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = DatabaseError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            event_id: row.event_id,
            order_id: row.order_id,
            applied_status: row.applied_status.parse()?,
            applied_at: row.applied_at,
        })
    }
}

pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyLedger for PgLedgerRepository {
    async fn has_applied(&self, event_id: &str) -> Result<bool, DatabaseError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM notification_ledger WHERE event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(exists)
    }

    async fn record_applied(&self, entry: &LedgerEntry) -> Result<(), DatabaseError> {
        // Unique insert; a concurrent writer for the same event sees zero rows.
        let result = sqlx::query(
            "INSERT INTO notification_ledger (event_id, order_id, applied_status, applied_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(&entry.event_id)
        .bind(&entry.order_id)
        .bind(entry.applied_status.as_str())
        .bind(entry.applied_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::new(DatabaseErrorKind::DuplicateEvent {
                event_id: entry.event_id.clone(),
            }));
        }
        Ok(())
    }

    async fn find_entry(&self, event_id: &str) -> Result<Option<LedgerEntry>, DatabaseError> {
        let row = sqlx::query_as::<_, LedgerRow>(
            "SELECT event_id, order_id, applied_status, applied_at
             FROM notification_ledger WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(LedgerEntry::try_from).transpose()
    }

    async fn entries_for_order(&self, order_id: &str) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            "SELECT event_id, order_id, applied_status, applied_at
             FROM notification_ledger WHERE order_id = $1
             ORDER BY applied_at ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }
}
