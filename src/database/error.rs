//! Storage error types shared by the Postgres and in-memory stores.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// A row that must exist was not found
    NotFound { entity: String, id: String },
    /// An order with this identifier already exists
    DuplicateOrder { order_id: String },
    /// A ledger entry for this event identifier already exists
    DuplicateEvent { event_id: String },
    /// The row's version moved on since it was read
    VersionConflict {
        order_id: String,
        expected_version: i64,
    },
    /// Connection, pool or network failure
    ConnectionError { message: String },
    /// Query failed for a non-transient reason
    QueryError { message: String },
    /// Persisted data could not be decoded
    CorruptRow { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionError { .. } | DatabaseErrorKind::VersionConflict { .. }
        )
    }

    pub fn is_duplicate_event(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::DuplicateEvent { .. })
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::VersionConflict { .. })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => DatabaseErrorKind::ConnectionError {
                message: err.to_string(),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseErrorKind::CorruptRow {
                    message: err.to_string(),
                }
            }
            sqlx::Error::Database(db_err) => DatabaseErrorKind::QueryError {
                message: db_err.message().to_string(),
            },
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::NotFound { entity, id } => {
                write!(f, "{} not found: {}", entity, id)
            }
            DatabaseErrorKind::DuplicateOrder { order_id } => {
                write!(f, "order already exists: {}", order_id)
            }
            DatabaseErrorKind::DuplicateEvent { event_id } => {
                write!(f, "event already applied: {}", event_id)
            }
            DatabaseErrorKind::VersionConflict {
                order_id,
                expected_version,
            } => write!(
                f,
                "concurrent update on order {} (expected version {})",
                order_id, expected_version
            ),
            DatabaseErrorKind::ConnectionError { message } => {
                write!(f, "database connection error: {}", message)
            }
            DatabaseErrorKind::QueryError { message } => {
                write!(f, "database query error: {}", message)
            }
            DatabaseErrorKind::CorruptRow { message } => {
                write!(f, "corrupt row: {}", message)
            }
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

        let kind = match err.kind {
            DatabaseErrorKind::DuplicateOrder { order_id } => {
                AppErrorKind::Domain(DomainError::DuplicateOrder { order_id })
            }
            DatabaseErrorKind::NotFound { id, .. } => {
                AppErrorKind::Domain(DomainError::OrderNotFound { order_id: id })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                is_retryable: err.is_retryable(),
                message: err.to_string(),
            }),
        };
        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        let conflict = DatabaseError::new(DatabaseErrorKind::VersionConflict {
            order_id: "ORD-1".to_string(),
            expected_version: 2,
        });
        assert!(conflict.is_retryable());
        assert!(conflict.is_version_conflict());

        let duplicate = DatabaseError::new(DatabaseErrorKind::DuplicateEvent {
            event_id: "evt".to_string(),
        });
        assert!(!duplicate.is_retryable());
        assert!(duplicate.is_duplicate_event());
        assert_eq!(duplicate.to_string(), "event already applied: evt");
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = DatabaseError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(matches!(err.kind, DatabaseErrorKind::NotFound { .. }));
    }
}
