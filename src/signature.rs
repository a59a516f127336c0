use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("missing raw body or signature header")]
    MissingInput,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed event payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// Parsed upstream event, produced only after the raw body verified.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Verifies the provider's `t=<unix>,v1=<hex>` signature header against the
/// raw, unparsed body bytes and parses the event on success.
///
/// The MAC is HMAC-SHA256 over `"{t}." + raw_body`; verifying against a
/// re-serialized JSON body is incorrect, so callers must pass the exact
/// bytes received on the wire. The signed timestamp must be within
/// `tolerance_secs` of `now` in either direction.
pub fn verify_and_parse(
    raw_body: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<StripeEvent, SignatureError> {
    if raw_body.is_empty() || signature_header.trim().is_empty() {
        return Err(SignatureError::MissingInput);
    }

    let header = parse_signature_header(signature_header)?;

    let age = now.timestamp() - header.timestamp;
    if age.abs() > tolerance_secs {
        return Err(SignatureError::InvalidSignature);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSignature)?;
    mac.update(header.timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    let expected = hex::encode(mac.finalize().into_bytes());

    let matched = header
        .candidates
        .iter()
        .any(|candidate| constant_time_eq(expected.as_bytes(), candidate.as_bytes()));
    if !matched {
        return Err(SignatureError::InvalidSignature);
    }

    Ok(serde_json::from_slice(raw_body)?)
}

struct SignatureHeader {
    timestamp: i64,
    candidates: Vec<String>,
}

fn parse_signature_header(value: &str) -> Result<SignatureHeader, SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in value.split(',') {
        let part = part.trim();
        if let Some(raw) = part.strip_prefix("t=") {
            timestamp = raw.parse::<i64>().ok();
        } else if let Some(raw) = part.strip_prefix("v1=") {
            candidates.push(raw.to_string());
        }
        // Unknown schemes (v0=...) are ignored, as the provider documents.
    }

    let timestamp = timestamp.ok_or(SignatureError::InvalidSignature)?;
    if candidates.is_empty() {
        return Err(SignatureError::InvalidSignature);
    }

    Ok(SignatureHeader {
        timestamp,
        candidates,
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
