use serde::{Deserialize, Serialize};
use specta::Type;
use uuid::Uuid;

use crate::types::{LedgerEvent, LedgerEventStatus};

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct LedgerEventSummary {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub provider: String,
    pub status: LedgerEventStatus,
    pub processing_attempts: i64,
    pub processed_at: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct ListEventsResponse {
    pub events: Vec<LedgerEventSummary>,
    pub next_before: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct GetEventResponse {
    pub event: LedgerEvent,
}
