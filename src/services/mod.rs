//! Services module for business logic and integrations

pub mod notification_event;
pub mod notification_validator;
pub mod order_reconciler;
pub mod status_query;
pub mod transaction_service;

pub use notification_event::{NotificationEvent, ReconcileError};
pub use notification_validator::NotificationValidator;
pub use order_reconciler::{OrderReconciler, ReconcileOutcome, ReconcilerConfig};
pub use status_query::StatusQueryClient;
pub use transaction_service::TransactionService;
