//! JotForm webhook adapter
//!
//! Turns a JotForm delivery (JSON or urlencoded) into a submission id plus
//! a flat raw payload, and checks the optional `X-JotForm-Signature` HMAC.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use thiserror::Error;

use crate::mapping::{DisplayFieldNames, SourceValue};
use crate::models::{DisplayFields, RawPayload};

/// Signature header sent by JotForm
pub const SIGNATURE_HEADER: &str = "x-jotform-signature";

/// Delivery metadata that is not form data
const ENVELOPE_KEYS: &[&str] = &[
    "submissionID",
    "submission_id",
    "formID",
    "formTitle",
    "rawRequest",
    "pretty",
    "ip",
    "type",
    "username",
    "webhookURL",
    "created_at",
];

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Webhook body could not be parsed: {0}")]
    MalformedBody(String),

    #[error("Webhook payload has no submissionID")]
    MissingSubmissionId,

    #[error("Webhook signature header is missing")]
    MissingSignature,

    #[error("Webhook signature does not match")]
    InvalidSignature,

    #[error("Webhook secret cannot key HMAC-SHA256")]
    InvalidSecret,
}

/// A delivery ready for ingest
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSubmission {
    pub source_submission_id: String,
    pub raw_payload: RawPayload,
}

/// Parse a JotForm webhook body
///
/// `content_type` picks the decoder; without one the body is sniffed.
pub fn parse_jotform_webhook(
    body: &[u8],
    content_type: Option<&str>,
) -> Result<ParsedSubmission, WebhookError> {
    let envelope = decode_body(body, content_type)?;

    let source_submission_id = ["submissionID", "submission_id"]
        .iter()
        .filter_map(|key| envelope.get(*key))
        .map(|v| SourceValue::from_json(v).render())
        .find(|id| !id.is_empty())
        .ok_or(WebhookError::MissingSubmissionId)?;

    let mut raw_payload = RawPayload::new();

    for (key, value) in envelope.iter() {
        if !ENVELOPE_KEYS.contains(&key.as_str()) {
            insert_field(&mut raw_payload, key, value);
        }
    }

    if let Some(raw_request) = raw_request(envelope.get("rawRequest"))? {
        for (key, value) in raw_request.iter() {
            insert_field(&mut raw_payload, key, value);
        }
    }

    let form_id = envelope
        .get("formID")
        .map(|v| SourceValue::from_json(v).render())
        .unwrap_or_default();
    let submission_date = envelope
        .get("created_at")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    raw_payload.insert("submission_id".to_string(), Value::String(source_submission_id.clone()));
    raw_payload.insert("form_id".to_string(), Value::String(form_id));
    raw_payload.insert("submission_date".to_string(), Value::String(submission_date));

    Ok(ParsedSubmission {
        source_submission_id,
        raw_payload,
    })
}

fn decode_body(body: &[u8], content_type: Option<&str>) -> Result<Map<String, Value>, WebhookError> {
    let content_type = content_type.unwrap_or("").to_ascii_lowercase();
    let is_form = if content_type.contains("application/x-www-form-urlencoded") {
        true
    } else if content_type.contains("json") {
        false
    } else {
        !body.iter().find(|b| !b.is_ascii_whitespace()).map(|b| *b == b'{').unwrap_or(false)
    };

    if is_form {
        return Ok(decode_form(body));
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(WebhookError::MalformedBody("expected a JSON object".to_string())),
        Err(e) => Err(WebhookError::MalformedBody(e.to_string())),
    }
}

/// Repeated keys (checkbox answers) become arrays
fn decode_form(body: &[u8]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        let key = key.trim_end_matches("[]").to_string();
        let value = Value::String(value.into_owned());
        match map.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key, value);
            }
        }
    }
    map
}

fn raw_request(value: Option<&Value>) -> Result<Option<Map<String, Value>>, WebhookError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) => Err(WebhookError::MalformedBody("rawRequest is not a JSON object".to_string())),
            Err(e) => Err(WebhookError::MalformedBody(format!("rawRequest: {}", e))),
        },
        Some(_) => Err(WebhookError::MalformedBody("rawRequest is not a JSON object".to_string())),
    }
}

/// Store a field, and also under its bare name for `q<digits>_<name>` keys
fn insert_field(payload: &mut RawPayload, key: &str, value: &Value) {
    payload.insert(key.to_string(), value.clone());
    if let Some(name) = question_name(key) {
        payload.insert(name.to_string(), value.clone());
    }
}

fn question_name(key: &str) -> Option<&str> {
    let rest = key.strip_prefix('q')?;
    let (digits, name) = rest.split_once('_')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) || name.is_empty() {
        return None;
    }
    Some(name)
}

fn keyed_mac(secret: &str, body: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSecret)?;
    mac.update(body);
    Ok(mac)
}

/// Hex HMAC-SHA256 of `body` under `secret`
pub fn sign(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    Ok(hex::encode(keyed_mac(secret, body)?.finalize().into_bytes()))
}

/// Check `X-JotForm-Signature` against the body
///
/// A missing header passes unless `require_signature` is set.
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    header: Option<&str>,
    require_signature: bool,
) -> Result<(), WebhookError> {
    let Some(header) = header.map(str::trim).filter(|h| !h.is_empty()) else {
        return if require_signature {
            Err(WebhookError::MissingSignature)
        } else {
            Ok(())
        };
    };

    let expected = hex::decode(header.to_ascii_lowercase()).map_err(|_| WebhookError::InvalidSignature)?;
    // Constant-time comparison
    keyed_mac(secret, body)?
        .verify_slice(&expected)
        .map_err(|_| WebhookError::InvalidSignature)
}

/// Denormalized dashboard columns from the raw payload
pub fn derive_display_fields(raw: &RawPayload, names: &DisplayFieldNames) -> DisplayFields {
    let field = |key: &str| {
        let value = SourceValue::from_payload(raw, key).render();
        (!value.is_empty()).then_some(value)
    };

    DisplayFields {
        submitter_name: field(&names.submitter_name),
        submitter_email: field(&names.submitter_email),
        builder_name: field(&names.builder_name),
        plan_name: field(&names.plan_name),
    }
}
