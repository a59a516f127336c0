use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

use crate::billing::{BillingError, BillingService};
use crate::signature::StripeEvent;

/// Provider event types this service acts on. Dispatch goes through this
/// enum rather than string keys so a newly handled type forces a variant
/// and every match stays exhaustive; anything else lands in `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEventKind {
    CheckoutSessionCompleted,
    InvoicePaymentSucceeded,
    InvoicePaymentFailed,
    CustomerSubscriptionDeleted,
    Unknown(String),
}

impl BillingEventKind {
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "invoice.payment_succeeded" => Self::InvoicePaymentSucceeded,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            "customer.subscription.deleted" => Self::CustomerSubscriptionDeleted,
            other => Self::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error(transparent)]
    Billing(#[from] BillingError),
}

/// Runs the business logic for one admitted event and returns the metadata
/// to record on completion.
///
/// Unknown event types are completed, not failed: the provider sends many
/// types this service has no interest in, and they must not pile up as
/// `failed` rows.
pub async fn handle_event(
    billing: &dyn BillingService,
    event: &StripeEvent,
) -> Result<Value, HandlerError> {
    match BillingEventKind::from_event_type(&event.event_type) {
        BillingEventKind::CheckoutSessionCompleted => {
            let object = payload_object(event)?;
            let company_id = required_str(object, "/metadata/company_id")?;
            let plan = required_str(object, "/metadata/plan")?;
            billing.activate_subscription(company_id, plan).await?;
            Ok(json!({
                "action": "subscription_activated",
                "company_id": company_id,
                "plan": plan,
            }))
        }
        BillingEventKind::InvoicePaymentSucceeded => {
            let object = payload_object(event)?;
            let subscription_id = required_str(object, "/subscription")?;
            billing.record_payment_success(subscription_id).await?;
            Ok(json!({
                "action": "payment_success_recorded",
                "subscription_id": subscription_id,
            }))
        }
        BillingEventKind::InvoicePaymentFailed => {
            let object = payload_object(event)?;
            let subscription_id = required_str(object, "/subscription")?;
            let reason = object
                .pointer("/last_payment_error/message")
                .and_then(Value::as_str);
            billing
                .record_payment_failure(subscription_id, reason)
                .await?;
            Ok(json!({
                "action": "payment_failure_recorded",
                "subscription_id": subscription_id,
            }))
        }
        BillingEventKind::CustomerSubscriptionDeleted => {
            let object = payload_object(event)?;
            let subscription_id = required_str(object, "/id")?;
            billing.cancel_subscription(subscription_id).await?;
            Ok(json!({
                "action": "subscription_canceled",
                "subscription_id": subscription_id,
            }))
        }
        BillingEventKind::Unknown(event_type) => {
            info!(event_id = %event.id, %event_type, "no handler for event type; completing as unhandled");
            Ok(json!({
                "unhandled": true,
                "event_type": event_type,
            }))
        }
    }
}

fn payload_object(event: &StripeEvent) -> Result<&Value, HandlerError> {
    event
        .data
        .pointer("/object")
        .ok_or_else(|| HandlerError::MalformedPayload("missing data.object".to_string()))
}

fn required_str<'a>(object: &'a Value, pointer: &str) -> Result<&'a str, HandlerError> {
    object
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            HandlerError::MalformedPayload(format!("missing data.object{pointer} field"))
        })
}
