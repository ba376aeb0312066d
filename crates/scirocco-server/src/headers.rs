//! Message metadata carried in `Scirocco-*` headers.
//!
//! Requests are decoded once into [`MessageHeaders`]; handlers never read the
//! raw header map.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use scirocco_queue::validation::{
    FIELD_FROM, FIELD_PAYLOAD, FIELD_SCHEDULED_TIME, FIELD_STATUS, FIELD_TO,
};
use scirocco_queue::{NewMessage, SystemFields, ValidationErrors};
use scirocco_types::{format_timestamp, Message, Payload};

pub const ID: HeaderName = HeaderName::from_static("scirocco-id");
pub const FROM: HeaderName = HeaderName::from_static("scirocco-from");
pub const TO: HeaderName = HeaderName::from_static("scirocco-to");
pub const STATUS: HeaderName = HeaderName::from_static("scirocco-status");
pub const TRIES: HeaderName = HeaderName::from_static("scirocco-tries");
pub const CREATED_TIME: HeaderName = HeaderName::from_static("scirocco-created-time");
pub const UPDATE_TIME: HeaderName = HeaderName::from_static("scirocco-update-time");
pub const SCHEDULED_TIME: HeaderName = HeaderName::from_static("scirocco-scheduled-time");
pub const PROCESSING_TIME: HeaderName = HeaderName::from_static("scirocco-processing-time");
pub const PROCESSED_TIME: HeaderName = HeaderName::from_static("scirocco-processed-time");
pub const ERROR_TIME: HeaderName = HeaderName::from_static("scirocco-error-time");
pub const PAYLOAD_TYPE: HeaderName = HeaderName::from_static("scirocco-payload-type");

/// Typed view of the `Scirocco-*` headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub status: Option<String>,
    pub tries: Option<String>,
    pub created_time: Option<String>,
    pub update_time: Option<String>,
    pub scheduled_time: Option<String>,
    pub processing_time: Option<String>,
    pub processed_time: Option<String>,
    pub error_time: Option<String>,
    pub payload_type: Option<String>,
    /// Fields whose header held bytes outside visible ASCII. Those fields
    /// decode as absent.
    pub unreadable: Vec<&'static str>,
}

/// Request fields a client may set; an unreadable one is a validation error.
const CLIENT_FIELDS: [&str; 4] = [FIELD_FROM, FIELD_TO, FIELD_STATUS, FIELD_SCHEDULED_TIME];

impl MessageHeaders {
    /// Reads every known header. Unknown headers are ignored.
    pub fn decode(headers: &HeaderMap) -> Self {
        let mut unreadable = Vec::new();
        let mut text = |name: &HeaderName, field: &'static str| {
            match headers.get(name).map(HeaderValue::to_str) {
                None => None,
                Some(Ok(value)) => Some(value.to_string()),
                Some(Err(_)) => {
                    unreadable.push(field);
                    None
                }
            }
        };

        let mut decoded = Self {
            id: text(&ID, "id"),
            from: text(&FROM, FIELD_FROM),
            to: text(&TO, FIELD_TO),
            status: text(&STATUS, FIELD_STATUS),
            tries: text(&TRIES, "tries"),
            created_time: text(&CREATED_TIME, "created_time"),
            update_time: text(&UPDATE_TIME, "update_time"),
            scheduled_time: text(&SCHEDULED_TIME, FIELD_SCHEDULED_TIME),
            processing_time: text(&PROCESSING_TIME, "processing_time"),
            processed_time: text(&PROCESSED_TIME, "processed_time"),
            error_time: text(&ERROR_TIME, "error_time"),
            payload_type: text(&PAYLOAD_TYPE, "payload_type"),
            unreadable: Vec::new(),
        };
        decoded.unreadable = unreadable;
        decoded
    }

    /// Validation errors for unreadable headers among `fields`.
    pub fn unreadable_errors(&self, fields: &[&str]) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        for &field in fields {
            if !self.unreadable.iter().any(|u| *u == field) {
                continue;
            }
            errors.add(
                field,
                format!("{field} must contain only visible ASCII characters"),
            );
        }
        errors
    }

    /// Builds a creation request from these headers and the decoded body.
    ///
    /// System-owned headers are passed along only so the engine can discard
    /// them; a body that failed to decode becomes a `payload` field error.
    pub fn into_new_message(self, body: Result<Payload, String>) -> NewMessage {
        let mut envelope_errors = self.unreadable_errors(&CLIENT_FIELDS);
        let payload = body.unwrap_or_else(|reason| {
            envelope_errors.add(FIELD_PAYLOAD, reason);
            Payload::default()
        });

        NewMessage {
            from: self.from,
            to: self.to,
            status: self.status,
            scheduled_time: self.scheduled_time,
            payload,
            system: SystemFields {
                tries: self.tries,
                created_time: self.created_time,
                update_time: self.update_time,
                processing_time: self.processing_time,
                processed_time: self.processed_time,
                error_time: self.error_time,
            },
            envelope_errors,
        }
    }

    /// Metadata for a stored message.
    ///
    /// `update_time` appears only once the message was mutated after creation;
    /// the optional timestamps only once set.
    pub fn from_message(message: &Message) -> Self {
        let ts = |t: &Option<chrono::DateTime<chrono::Utc>>| t.as_ref().map(format_timestamp);
        Self {
            id: Some(message.id.to_hex()),
            from: Some(message.from.clone()),
            to: Some(message.to.clone()),
            status: Some(message.status.as_str().to_string()),
            tries: Some(message.tries.to_string()),
            created_time: Some(format_timestamp(&message.created_time)),
            update_time: message
                .was_updated()
                .then(|| format_timestamp(&message.update_time)),
            scheduled_time: ts(&message.scheduled_time),
            processing_time: ts(&message.processing_time),
            processed_time: ts(&message.processed_time),
            error_time: ts(&message.error_time),
            payload_type: Some(message.payload.kind().as_str().to_string()),
            unreadable: Vec::new(),
        }
    }

    /// Writes every present field into `headers`.
    pub fn encode(&self, headers: &mut HeaderMap) {
        let fields = [
            (ID, &self.id),
            (FROM, &self.from),
            (TO, &self.to),
            (STATUS, &self.status),
            (TRIES, &self.tries),
            (CREATED_TIME, &self.created_time),
            (UPDATE_TIME, &self.update_time),
            (SCHEDULED_TIME, &self.scheduled_time),
            (PROCESSING_TIME, &self.processing_time),
            (PROCESSED_TIME, &self.processed_time),
            (ERROR_TIME, &self.error_time),
            (PAYLOAD_TYPE, &self.payload_type),
        ];
        for (name, value) in fields {
            let Some(value) = value else { continue };
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(_) => tracing::warn!(header = %name, "dropping header with unencodable value"),
            }
        }
    }
}

fn is_json_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// Classifies and decodes a request body.
///
/// JSON media types must carry valid JSON; any other declared type is stored
/// as text. Without a `Content-Type`, a body that parses as JSON is JSON and
/// anything else is text. An empty body is an empty JSON object.
///
/// # Errors
///
/// A human-readable reason when the body cannot be decoded.
pub fn decode_body(headers: &HeaderMap, body: &[u8]) -> Result<Payload, String> {
    if body.is_empty() {
        return Ok(Payload::default());
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    match content_type {
        Some(ct) if is_json_media_type(ct) => serde_json::from_slice(body)
            .map(Payload::Json)
            .map_err(|e| format!("payload is not valid JSON: {e}")),
        Some(_) => text_payload(body),
        None => match serde_json::from_slice(body) {
            Ok(value) => Ok(Payload::Json(value)),
            Err(_) => text_payload(body),
        },
    }
}

fn text_payload(body: &[u8]) -> Result<Payload, String> {
    std::str::from_utf8(body)
        .map(|s| Payload::Text(s.to_string()))
        .map_err(|e| format!("payload is not valid UTF-8 text: {e}"))
}

/// `Content-Type` to answer with for a stored payload.
pub fn content_type_for(payload: &Payload) -> HeaderValue {
    match payload {
        Payload::Json(_) => HeaderValue::from_static("application/json"),
        Payload::Text(_) => HeaderValue::from_static("text/plain; charset=utf-8"),
    }
}
