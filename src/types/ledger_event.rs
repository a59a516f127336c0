use serde::{Deserialize, Serialize};
use specta::Type;
use uuid::Uuid;

/// One row of the webhook event ledger. Rows are never deleted; they are
/// the permanent audit trail and the replay-safety barrier.
#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct LedgerEvent {
    pub id: Uuid,
    /// The upstream provider's globally unique event id (the idempotency key).
    pub event_id: String,
    pub event_type: String,
    pub provider: String,
    /// Raw JSON snapshot of the inbound event body.
    pub payload: String,
    /// JSON side-data recorded on completion.
    pub metadata: Option<String>,
    pub error_message: Option<String>,

    pub status: LedgerEventStatus,
    pub processing_attempts: i64,

    /// Set if and only if status is `completed`.
    pub processed_at: Option<String>,
    pub created_at: String,
    /// Basis for stale-lock detection.
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventStatus {
    Received,
    Processing,
    Completed,
    Failed,
}
