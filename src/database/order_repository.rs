use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::OrderRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Local lifecycle of an order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Pending,
    PendingReview,
    Paid,
    Expired,
    Cancelled,
    Denied,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Pending => "pending",
            OrderStatus::PendingReview => "pending_review",
            OrderStatus::Paid => "paid",
            OrderStatus::Expired => "expired",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Denied => "denied",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Paid is terminal for everything except a refund.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid
                | OrderStatus::Expired
                | OrderStatus::Cancelled
                | OrderStatus::Denied
                | OrderStatus::Refunded
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created" => Ok(OrderStatus::Created),
            "pending" => Ok(OrderStatus::Pending),
            "pending_review" => Ok(OrderStatus::PendingReview),
            "paid" => Ok(OrderStatus::Paid),
            "expired" => Ok(OrderStatus::Expired),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "denied" => Ok(OrderStatus::Denied),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(DatabaseError::new(DatabaseErrorKind::CorruptRow {
                message: format!("unknown order status: {}", other),
            })),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub order_id: String,
    pub gross_amount: i64,
    pub status: OrderStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: String,
    pub gross_amount: i64,
}

/// A status change guarded by the version the caller read, together with the
/// ledger entry that must be written in the same unit of work.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub order_id: String,
    pub expected_version: i64,
    pub to: OrderStatus,
    pub event_id: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct OrderRow {
    order_id: String,
    gross_amount: i64,
    status: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DatabaseError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            order_id: row.order_id,
            gross_amount: row.gross_amount,
            status: row.status.parse()?,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "order_id, gross_amount, status, version, created_at, updated_at";

/// Postgres-backed order store
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn find_order(&self, order_id: &str) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE order_id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(Order::try_from).transpose()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (order_id, gross_amount, status, version)
             VALUES ($1, $2, $3, 0)
             ON CONFLICT (order_id) DO NOTHING
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(&order.order_id)
        .bind(order.gross_amount)
        .bind(OrderStatus::Created.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => Order::try_from(row),
            None => Err(DatabaseError::new(DatabaseErrorKind::DuplicateOrder {
                order_id: order.order_id,
            })),
        }
    }

    async fn apply_transition(&self, transition: &StatusTransition) -> Result<Order, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let updated = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET status = $3, version = version + 1, updated_at = $4
             WHERE order_id = $1 AND version = $2
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(&transition.order_id)
        .bind(transition.expected_version)
        .bind(transition.to.as_str())
        .bind(transition.applied_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some(updated) = updated else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Err(DatabaseError::new(DatabaseErrorKind::VersionConflict {
                order_id: transition.order_id.clone(),
                expected_version: transition.expected_version,
            }));
        };

        let inserted = sqlx::query(
            "INSERT INTO notification_ledger (event_id, order_id, applied_status, applied_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(&transition.event_id)
        .bind(&transition.order_id)
        .bind(transition.to.as_str())
        .bind(transition.applied_at)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Err(DatabaseError::new(DatabaseErrorKind::DuplicateEvent {
                event_id: transition.event_id.clone(),
            }));
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Order::try_from(updated)
    }

    async fn discard_untouched_order(&self, order_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM orders
             WHERE order_id = $1 AND status = $2 AND version = 0
               AND NOT EXISTS (SELECT 1 FROM notification_ledger WHERE order_id = $1)",
        )
        .bind(order_id)
        .bind(OrderStatus::Created.as_str())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}
