pub mod ledger_event;
pub mod intake;
pub mod ledger_api;
pub mod api_error;

#[allow(unused_imports)]
pub use ledger_event::{LedgerEvent, LedgerEventStatus};
#[allow(unused_imports)]
pub use intake::WebhookAck;
#[allow(unused_imports)]
pub use ledger_api::{GetEventResponse, LedgerEventSummary, ListEventsResponse};
#[allow(unused_imports)]
pub use api_error::{ApiErrorCode, ApiErrorResponse};
