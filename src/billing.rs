use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("billing backend unavailable: {0}")]
    Unavailable(String),
    #[error("billing rejected operation: {0}")]
    Rejected(String),
}

/// Subscription/billing domain consumed by the event handlers. The gate and
/// ledger know nothing about it. Constructed explicitly and injected into
/// the dispatch worker; never a module-level singleton.
#[async_trait]
pub trait BillingService: Send + Sync {
    async fn activate_subscription(
        &self,
        company_id: &str,
        plan: &str,
    ) -> Result<(), BillingError>;

    async fn record_payment_success(&self, subscription_id: &str) -> Result<(), BillingError>;

    async fn record_payment_failure(
        &self,
        subscription_id: &str,
        reason: Option<&str>,
    ) -> Result<(), BillingError>;

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), BillingError>;
}

/// Stand-in wired up when no real billing backend is configured. Logs every
/// call and succeeds.
pub struct LogOnlyBilling;

#[async_trait]
impl BillingService for LogOnlyBilling {
    async fn activate_subscription(
        &self,
        company_id: &str,
        plan: &str,
    ) -> Result<(), BillingError> {
        info!(company_id, plan, "billing: activate subscription");
        Ok(())
    }

    async fn record_payment_success(&self, subscription_id: &str) -> Result<(), BillingError> {
        info!(subscription_id, "billing: payment succeeded");
        Ok(())
    }

    async fn record_payment_failure(
        &self,
        subscription_id: &str,
        reason: Option<&str>,
    ) -> Result<(), BillingError> {
        info!(subscription_id, reason, "billing: payment failed");
        Ok(())
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), BillingError> {
        info!(subscription_id, "billing: subscription canceled");
        Ok(())
    }
}
