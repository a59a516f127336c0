use serde::{Deserialize, Serialize};
use specta::Type;

/// Acknowledgment returned to the provider. Always 200: the provider must
/// not retry merely because downstream processing is still running.
#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct WebhookAck {
    pub received: bool,
    /// Present (and false) only on a duplicate skip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<bool>,
    pub event_id: String,
}
