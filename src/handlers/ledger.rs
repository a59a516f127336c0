use axum::{Json, extract::State};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    extractors::{ValidPath, ValidQuery},
    ledger::{LedgerCursor, ListEventsParams, StoreError, get_event, list_events},
    state::AppState,
    types::{GetEventResponse, LedgerEventStatus, ListEventsResponse},
};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    limit: Option<i64>,
    before: Option<String>,
    status: Option<String>,
    event_type: Option<String>,
    provider: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorPayload {
    created_at: String,
    id: String,
}

pub async fn list_events_handler(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<ListEventsQuery>,
) -> Result<Json<ListEventsResponse>, ApiError> {
    let limit = parse_limit(query.limit)?;
    let before = match query.before {
        Some(raw) => Some(decode_cursor(&raw)?),
        None => None,
    };
    let status = match query.status {
        Some(raw) => Some(parse_status(&raw)?),
        None => None,
    };
    let event_type = parse_filter("event_type", query.event_type)?;
    let provider = parse_filter("provider", query.provider)?;

    let params = ListEventsParams {
        limit,
        before,
        status,
        event_type,
        provider,
    };

    let result = list_events(&state.pool, &params)
        .await
        .map_err(map_store_error)?;
    let next_before = match result.next_before {
        Some(cursor) => Some(encode_cursor(&cursor)?),
        None => None,
    };

    Ok(Json(ListEventsResponse {
        events: result.events,
        next_before,
    }))
}

pub async fn get_event_handler(
    State(state): State<AppState>,
    ValidPath(id): ValidPath<String>,
) -> Result<Json<GetEventResponse>, ApiError> {
    let id = parse_uuid("id", &id)?;
    let response = get_event(&state.pool, id).await.map_err(map_store_error)?;
    Ok(Json(response))
}

fn parse_limit(raw: Option<i64>) -> Result<i64, ApiError> {
    let limit = raw.unwrap_or(DEFAULT_LIMIT);
    if limit <= 0 {
        return Err(ApiError::BadRequest("limit must be > 0".to_string()));
    }
    Ok(limit.min(MAX_LIMIT))
}

fn parse_status(raw: &str) -> Result<LedgerEventStatus, ApiError> {
    match raw {
        "received" => Ok(LedgerEventStatus::Received),
        "processing" => Ok(LedgerEventStatus::Processing),
        "completed" => Ok(LedgerEventStatus::Completed),
        "failed" => Ok(LedgerEventStatus::Failed),
        other => Err(ApiError::BadRequest(format!("unknown status: {other}"))),
    }
}

fn parse_filter(field: &str, raw: Option<String>) -> Result<Option<String>, ApiError> {
    match raw {
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(ApiError::BadRequest(format!("{field} must be non-empty")));
            }
            Ok(Some(trimmed.to_string()))
        }
        None => Ok(None),
    }
}

fn parse_uuid(field: &str, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("{field} must be a UUID")))
}

fn encode_cursor(cursor: &LedgerCursor) -> Result<String, ApiError> {
    let payload = CursorPayload {
        created_at: cursor.created_at.clone(),
        id: cursor.id.to_string(),
    };
    let bytes = serde_json::to_vec(&payload)
        .map_err(|err| ApiError::Internal(format!("failed to encode cursor: {err}")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn decode_cursor(raw: &str) -> Result<LedgerCursor, ApiError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|_| ApiError::BadRequest("invalid before cursor".to_string()))?;
    let payload: CursorPayload = serde_json::from_slice(&bytes)
        .map_err(|_| ApiError::BadRequest("invalid before cursor".to_string()))?;
    let id = parse_uuid("before cursor id", &payload.id)?;

    Ok(LedgerCursor {
        created_at: payload.created_at,
        id,
    })
}

fn map_store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::Conflict(message) => ApiError::Conflict(message),
        StoreError::Db(db) => ApiError::Db(db),
        StoreError::NotFound(message) => ApiError::NotFound(message),
        StoreError::Parse(message) => ApiError::Internal(message),
    }
}
