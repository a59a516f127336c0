use chrono::{Duration, SecondsFormat, Utc};
use sqlx::{QueryBuilder, SqlitePool};
use uuid::Uuid;

use crate::types::{GetEventResponse, LedgerEvent, LedgerEventStatus, LedgerEventSummary};

#[derive(Debug)]
pub enum StoreError {
    Db(sqlx::Error),
    Conflict(String),
    NotFound(String),
    Parse(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err)
    }
}

/// Inbound event as seen by the gate, before any ledger row exists.
#[derive(Debug, Clone)]
pub struct NewLedgerEvent<'a> {
    pub event_id: &'a str,
    pub event_type: &'a str,
    pub provider: &'a str,
    pub payload: &'a str,
}

/// Outcome of a gate check. Skips are normal control flow, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Admitted { attempts: i64 },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Row already terminal-completed; the common idempotent-replay case.
    AlreadyCompleted,
    /// Another worker holds a fresh `processing` row.
    InFlight,
    /// A concurrent caller won the insert or the re-admission CAS.
    RaceLost,
}

/// Decides whether processing of `new` may proceed, creating or refreshing
/// the ledger row as a side effect.
///
/// The entire concurrency primitive is one row plus its unique constraint
/// plus conditional updates guarded on the observed `updated_at`: under
/// concurrent calls for the same event id, exactly one caller is admitted
/// while the row stays fresh. A `processing` row older than
/// `stale_after_secs` is treated as an abandoned lock and re-admitted with
/// `processing_attempts` incremented by one; `failed` rows are always
/// re-admitted since they represent incomplete work.
pub async fn should_process(
    pool: &SqlitePool,
    stale_after_secs: i64,
    new: &NewLedgerEvent<'_>,
) -> Result<GateDecision, StoreError> {
    let now = Utc::now();
    let now_str = format_utc(now);

    let existing = sqlx::query_as::<_, GateRow>(
        r#"
        SELECT status, processing_attempts, updated_at
        FROM webhook_events
        WHERE event_id = ?
        "#,
    )
    .bind(new.event_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = existing else {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (
                id,
                event_id,
                event_type,
                provider,
                payload,
                status,
                processing_attempts,
                created_at,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, 'processing', 1, ?, ?)
            ON CONFLICT(event_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(new.event_id)
        .bind(new.event_type)
        .bind(new.provider)
        .bind(new.payload)
        .bind(&now_str)
        .bind(&now_str)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            // A concurrent request inserted first.
            return Ok(GateDecision::Skipped(SkipReason::RaceLost));
        }
        return Ok(GateDecision::Admitted { attempts: 1 });
    };

    match parse_status(&row.status)? {
        LedgerEventStatus::Completed => Ok(GateDecision::Skipped(SkipReason::AlreadyCompleted)),
        LedgerEventStatus::Processing => {
            let updated_at = parse_utc(&row.updated_at)?;
            if now - updated_at < Duration::seconds(stale_after_secs) {
                return Ok(GateDecision::Skipped(SkipReason::InFlight));
            }
            readmit(pool, new.event_id, &row, &now_str).await
        }
        // Failed rows are incomplete work; a `received` row that never made
        // it to `processing` is the same thing. Neither is subject to the
        // staleness check.
        LedgerEventStatus::Failed | LedgerEventStatus::Received => {
            readmit(pool, new.event_id, &row, &now_str).await
        }
    }
}

// Compare-and-set on the observed (status, updated_at): if another worker
// got here first the guard fails and the row is left alone.
async fn readmit(
    pool: &SqlitePool,
    event_id: &str,
    observed: &GateRow,
    now_str: &str,
) -> Result<GateDecision, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_events
        SET status = 'processing',
            processing_attempts = processing_attempts + 1,
            updated_at = ?
        WHERE event_id = ?
          AND status = ?
          AND updated_at = ?
        "#,
    )
    .bind(now_str)
    .bind(event_id)
    .bind(&observed.status)
    .bind(&observed.updated_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(GateDecision::Skipped(SkipReason::RaceLost));
    }
    Ok(GateDecision::Admitted {
        attempts: observed.processing_attempts + 1,
    })
}

/// Terminal success transition. Safe to call twice; the second call is a
/// no-op overwrite.
pub async fn mark_completed(
    pool: &SqlitePool,
    event_id: &str,
    metadata: &serde_json::Value,
) -> Result<(), StoreError> {
    let now_str = format_utc(Utc::now());
    let metadata = serde_json::to_string(metadata)
        .map_err(|err| StoreError::Parse(format!("invalid metadata JSON: {err}")))?;

    let result = sqlx::query(
        r#"
        UPDATE webhook_events
        SET status = 'completed',
            processed_at = ?,
            metadata = ?,
            error_message = NULL,
            updated_at = ?
        WHERE event_id = ?
        "#,
    )
    .bind(&now_str)
    .bind(&metadata)
    .bind(&now_str)
    .bind(event_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("event not found".to_string()));
    }
    Ok(())
}

/// Terminal failure transition. Leaves `processing_attempts` untouched so
/// the next gate pass re-admits with the counter continuing to climb.
pub async fn mark_failed(
    pool: &SqlitePool,
    event_id: &str,
    error_message: &str,
) -> Result<(), StoreError> {
    let now_str = format_utc(Utc::now());

    let result = sqlx::query(
        r#"
        UPDATE webhook_events
        SET status = 'failed',
            error_message = ?,
            processed_at = NULL,
            updated_at = ?
        WHERE event_id = ?
        "#,
    )
    .bind(error_message)
    .bind(&now_str)
    .bind(event_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("event not found".to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LedgerCursor {
    pub created_at: String,
    pub id: Uuid,
}

#[derive(Debug, Clone)]
pub struct ListEventsParams {
    pub limit: i64,
    pub before: Option<LedgerCursor>,
    pub status: Option<LedgerEventStatus>,
    pub event_type: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListEventsResult {
    pub events: Vec<LedgerEventSummary>,
    pub next_before: Option<LedgerCursor>,
}

pub async fn list_events(
    pool: &SqlitePool,
    params: &ListEventsParams,
) -> Result<ListEventsResult, StoreError> {
    let mut query = QueryBuilder::new(
        "SELECT \
            id, \
            event_id, \
            event_type, \
            provider, \
            status, \
            processing_attempts, \
            processed_at, \
            error_message, \
            created_at, \
            updated_at \
        FROM webhook_events \
        WHERE 1 = 1",
    );

    if let Some(status) = params.status {
        query.push(" AND status = ");
        query.push_bind(status_to_str(status));
    }

    if let Some(event_type) = params.event_type.as_deref() {
        query.push(" AND event_type = ");
        query.push_bind(event_type);
    }

    if let Some(provider) = params.provider.as_deref() {
        query.push(" AND provider = ");
        query.push_bind(provider);
    }

    if let Some(cursor) = &params.before {
        query.push(" AND (created_at < ");
        query.push_bind(&cursor.created_at);
        query.push(" OR (created_at = ");
        query.push_bind(&cursor.created_at);
        query.push(" AND id < ");
        query.push_bind(cursor.id.to_string());
        query.push("))");
    }

    query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
    query.push_bind(params.limit + 1);

    let rows: Vec<SummaryRow> = query.build_query_as().fetch_all(pool).await?;

    let has_more = rows.len() > params.limit as usize;
    let take_count = if has_more {
        params.limit as usize
    } else {
        rows.len()
    };

    let mut events = Vec::with_capacity(take_count);
    let mut last_cursor = None;

    for row in rows.into_iter().take(take_count) {
        let summary = summary_from_row(row)?;
        last_cursor = Some(LedgerCursor {
            created_at: summary.created_at.clone(),
            id: summary.id,
        });
        events.push(summary);
    }

    let next_before = if has_more { last_cursor } else { None };

    Ok(ListEventsResult {
        events,
        next_before,
    })
}

pub async fn get_event(pool: &SqlitePool, id: Uuid) -> Result<GetEventResponse, StoreError> {
    let row = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT
            id,
            event_id,
            event_type,
            provider,
            payload,
            metadata,
            error_message,
            status,
            processing_attempts,
            processed_at,
            created_at,
            updated_at
        FROM webhook_events
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound("event not found".to_string()))?;

    Ok(GetEventResponse {
        event: event_from_row(row)?,
    })
}

#[derive(sqlx::FromRow)]
struct GateRow {
    status: String,
    processing_attempts: i64,
    updated_at: String,
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: String,
    event_id: String,
    event_type: String,
    provider: String,
    status: String,
    processing_attempts: i64,
    processed_at: Option<String>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    event_id: String,
    event_type: String,
    provider: String,
    payload: String,
    metadata: Option<String>,
    error_message: Option<String>,
    status: String,
    processing_attempts: i64,
    processed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

fn summary_from_row(row: SummaryRow) -> Result<LedgerEventSummary, StoreError> {
    Ok(LedgerEventSummary {
        id: parse_id(&row.id)?,
        event_id: row.event_id,
        event_type: row.event_type,
        provider: row.provider,
        status: parse_status(&row.status)?,
        processing_attempts: row.processing_attempts,
        processed_at: row.processed_at,
        error_message: row.error_message,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn event_from_row(row: EventRow) -> Result<LedgerEvent, StoreError> {
    Ok(LedgerEvent {
        id: parse_id(&row.id)?,
        event_id: row.event_id,
        event_type: row.event_type,
        provider: row.provider,
        payload: row.payload,
        metadata: row.metadata,
        error_message: row.error_message,
        status: parse_status(&row.status)?,
        processing_attempts: row.processing_attempts,
        processed_at: row.processed_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn parse_id(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|err| StoreError::Parse(format!("invalid event row id: {err}")))
}

fn parse_status(status: &str) -> Result<LedgerEventStatus, StoreError> {
    match status {
        "received" => Ok(LedgerEventStatus::Received),
        "processing" => Ok(LedgerEventStatus::Processing),
        "completed" => Ok(LedgerEventStatus::Completed),
        "failed" => Ok(LedgerEventStatus::Failed),
        other => Err(StoreError::Parse(format!("unknown status: {other}"))),
    }
}

pub(crate) fn status_to_str(status: LedgerEventStatus) -> &'static str {
    match status {
        LedgerEventStatus::Received => "received",
        LedgerEventStatus::Processing => "processing",
        LedgerEventStatus::Completed => "completed",
        LedgerEventStatus::Failed => "failed",
    }
}

fn parse_utc(value: &str) -> Result<chrono::DateTime<Utc>, StoreError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Parse(format!("invalid updated_at: {err}")))
}

fn format_utc(dt: chrono::DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}
