use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use chrono::Utc;
use tracing::info;

use crate::{
    dispatch::DispatchJob,
    error::ApiError,
    ledger::{GateDecision, NewLedgerEvent, StoreError, should_process},
    signature::{self, SignatureError},
    state::AppState,
    types::WebhookAck,
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Inbound webhook intake: verify → gate → enqueue → ack.
///
/// Takes the body as raw `Bytes` on purpose: the signature covers the exact
/// wire bytes, so no body-parsing extractor may run first. Duplicates and
/// races ack with 200 regardless of the eventual handler outcome; the only
/// 4xx paths are signature/input rejection, which never reach the ledger.
pub async fn stripe_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let event = signature::verify_and_parse(
        &body,
        signature,
        &state.config.webhook_secret,
        state.config.signature_tolerance_secs,
        Utc::now(),
    )
    .map_err(map_signature_error)?;

    let payload = String::from_utf8_lossy(&body);
    let new_event = NewLedgerEvent {
        event_id: &event.id,
        event_type: &event.event_type,
        provider: "stripe",
        payload: &payload,
    };

    let decision = should_process(&state.pool, state.config.stale_after_secs, &new_event)
        .await
        .map_err(map_store_error)?;

    match decision {
        GateDecision::Admitted { attempts } => {
            info!(event_id = %event.id, event_type = %event.event_type, attempts, "event admitted");
            let event_id = event.id.clone();
            state
                .queue
                .enqueue(DispatchJob {
                    event_id: event_id.clone(),
                    event,
                })
                .await
                .map_err(|err| ApiError::Internal(err.to_string()))?;
            Ok(Json(WebhookAck {
                received: true,
                processed: None,
                event_id,
            }))
        }
        GateDecision::Skipped(reason) => {
            info!(event_id = %event.id, ?reason, "duplicate event skipped");
            Ok(Json(WebhookAck {
                received: true,
                processed: Some(false),
                event_id: event.id,
            }))
        }
    }
}

fn map_signature_error(err: SignatureError) -> ApiError {
    match err {
        SignatureError::MissingInput => {
            ApiError::BadRequest("missing raw body or signature header".to_string())
        }
        SignatureError::InvalidSignature => ApiError::BadRequest("invalid signature".to_string()),
        SignatureError::MalformedPayload(parse) => {
            ApiError::BadRequest(format!("malformed event payload: {parse}"))
        }
    }
}

fn map_store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::Conflict(message) => ApiError::Conflict(message),
        StoreError::Db(db) => ApiError::Db(db),
        StoreError::NotFound(message) => ApiError::NotFound(message),
        StoreError::Parse(message) => ApiError::Internal(message),
    }
}
