mod events;
mod queue;

pub use events::{BillingEventKind, HandlerError, handle_event};
pub use queue::{DispatchJob, DispatchQueue, DispatchWorker, QueueClosed, channel};
