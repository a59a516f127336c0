use std::sync::Arc;

use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::billing::BillingService;
use crate::dispatch::events::handle_event;
use crate::ledger::{mark_completed, mark_failed};
use crate::signature::StripeEvent;

/// One gate-admitted event awaiting deferred processing.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub event_id: String,
    pub event: StripeEvent,
}

#[derive(Debug, Error)]
#[error("dispatch queue closed")]
pub struct QueueClosed;

/// Sending half handed to the intake path.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<DispatchJob>,
}

impl DispatchQueue {
    /// Hands an admitted event to the worker. Awaits capacity rather than
    /// shedding: the ledger row is already `processing`, so a dropped job
    /// would strand it until the staleness window expires.
    pub async fn enqueue(&self, job: DispatchJob) -> Result<(), QueueClosed> {
        self.tx.send(job).await.map_err(|_| QueueClosed)
    }
}

/// Long-lived consumer of the dispatch queue. Run it on its own task and
/// await the JoinHandle at shutdown: once every `DispatchQueue` clone is
/// dropped the worker drains what is buffered and exits, so pending work
/// at shutdown is observable instead of silently dropped.
pub struct DispatchWorker {
    rx: mpsc::Receiver<DispatchJob>,
    pool: SqlitePool,
    billing: Arc<dyn BillingService>,
}

pub fn channel(
    capacity: usize,
    pool: SqlitePool,
    billing: Arc<dyn BillingService>,
) -> (DispatchQueue, DispatchWorker) {
    let (tx, rx) = mpsc::channel(capacity);
    (DispatchQueue { tx }, DispatchWorker { rx, pool, billing })
}

impl DispatchWorker {
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            self.process(job).await;
        }
        info!("dispatch queue drained, worker exiting");
    }

    // Once admitted, a job runs to completion or failure; there is no
    // mid-flight abort. The handler runs on its own task so a panic
    // surfaces as a JoinError here instead of killing the worker.
    async fn process(&self, job: DispatchJob) {
        let billing = Arc::clone(&self.billing);
        let event = job.event.clone();
        let outcome =
            tokio::spawn(async move { handle_event(billing.as_ref(), &event).await }).await;

        let recorded = match outcome {
            Ok(Ok(metadata)) => {
                info!(event_id = %job.event_id, "event processed");
                mark_completed(&self.pool, &job.event_id, &metadata).await
            }
            Ok(Err(err)) => {
                warn!(event_id = %job.event_id, %err, "handler failed");
                mark_failed(&self.pool, &job.event_id, &err.to_string()).await
            }
            Err(join_err) => {
                warn!(event_id = %job.event_id, "handler panicked");
                mark_failed(&self.pool, &job.event_id, &format!("handler panicked: {join_err}"))
                    .await
            }
        };

        if let Err(err) = recorded {
            error!(event_id = %job.event_id, "failed to record terminal status: {err:?}");
        }
    }
}
