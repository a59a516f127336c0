mod store;

pub use store::{
    GateDecision, LedgerCursor, ListEventsParams, ListEventsResult, NewLedgerEvent, SkipReason,
    StoreError, get_event, list_events, mark_completed, mark_failed, should_process,
};
