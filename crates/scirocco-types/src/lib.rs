//! Shared types for the Scirocco message queue.
//!
//! This crate holds the message record and the small value types that travel
//! between the storage layer, the queue engine and the HTTP adapter: message
//! identifiers, the closed status enumeration, and the opaque payload.
//!
//! Nothing here performs I/O. Every other crate in the workspace depends on
//! `scirocco-types` for these definitions so that status words, id rendering
//! and timestamp encoding live in exactly one place.

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier of a message.
///
/// Rendered as 32 lowercase hex digits, which is also the form used in
/// `/messages/<id>` locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the lowercase hex rendering of this identifier.
    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl std::str::FromStr for MessageId {
    type Err = ParseMessageIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let is_hex = s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit());
        if !is_hex {
            return Err(ParseMessageIdError(s.to_string()));
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ParseMessageIdError(s.to_string()))
    }
}

/// Error returned when a string is not a valid message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid message id: {0}")]
pub struct ParseMessageIdError(pub String);

/// Lifecycle status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Waiting to be claimed.
    Pending,
    /// Waiting to be claimed, not before its scheduled time.
    Scheduled,
    /// Claimed by a consumer and not yet acknowledged.
    Processing,
    /// Acknowledged by the consumer. Terminal.
    Processed,
    /// Failed after exhausting its retry budget. Terminal.
    Error,
}

impl MessageStatus {
    /// All status values, in lifecycle order.
    pub const ALL: [MessageStatus; 5] = [
        Self::Pending,
        Self::Scheduled,
        Self::Processing,
        Self::Processed,
        Self::Error,
    ];

    /// Returns the wire label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Error => "error",
        }
    }

    /// Whether a message in this status may be claimed by `pull`.
    pub fn is_claimable(self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled)
    }

    /// Whether no further transition leaves this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Processed | Self::Error)
    }

    /// Decodes the status a producer asked for at creation time.
    ///
    /// - absent → `Pending`
    /// - `pending` / `scheduled` → honored
    /// - any other known status word → `Pending`
    /// - anything else → `Err`
    pub fn decode_initial(requested: Option<&str>) -> Result<Self, ParseStatusError> {
        let Some(raw) = requested else {
            return Ok(Self::Pending);
        };
        match raw.parse::<Self>()? {
            status @ (Self::Pending | Self::Scheduled) => Ok(status),
            Self::Processing | Self::Processed | Self::Error => Ok(Self::Pending),
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "scheduled" => Ok(Self::Scheduled),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "error" => Ok(Self::Error),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown status word.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown message status: {0}")]
pub struct ParseStatusError(pub String);

/// Content classification of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// A JSON document.
    Json,
    /// Raw text, returned verbatim.
    Text,
}

impl PayloadKind {
    /// Returns the storage label for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl std::str::FromStr for PayloadKind {
    type Err = ParsePayloadKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            _ => Err(ParsePayloadKindError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown payload kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown payload kind: {0}")]
pub struct ParsePayloadKindError(pub String);

/// Opaque message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "lowercase")]
pub enum Payload {
    /// Structured JSON value.
    Json(serde_json::Value),
    /// Raw text blob.
    Text(String),
}

impl Payload {
    /// Returns the content classification.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Json(_) => PayloadKind::Json,
            Self::Text(_) => PayloadKind::Text,
        }
    }

    /// Serialises the payload into the string stored on disk and sent on the wire.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Json(value) => serde_json::to_string(value),
            Self::Text(text) => Ok(text.clone()),
        }
    }

    /// Rebuilds a payload from its stored kind and encoded body.
    pub fn decode(kind: PayloadKind, body: &str) -> Result<Self, serde_json::Error> {
        match kind {
            PayloadKind::Json => serde_json::from_str(body).map(Self::Json),
            PayloadKind::Text => Ok(Self::Text(body.to_string())),
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::Json(serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// A queued message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier, assigned at creation.
    pub id: MessageId,
    /// Producer identity.
    pub from: String,
    /// Recipient identity.
    pub to: String,
    /// Current lifecycle status.
    pub status: MessageStatus,
    /// Number of successful claims.
    pub tries: u32,
    /// Opaque body.
    pub payload: Payload,
    /// Creation instant. Never changes.
    pub created_time: DateTime<Utc>,
    /// Instant of the latest mutation (creation included).
    pub update_time: DateTime<Utc>,
    /// Explicit earliest claim instant. `None` means "as soon as created".
    pub scheduled_time: Option<DateTime<Utc>>,
    /// Instant of the latest claim.
    pub processing_time: Option<DateTime<Utc>>,
    /// Instant of the acknowledgement.
    pub processed_time: Option<DateTime<Utc>>,
    /// Instant the message entered the `error` state.
    pub error_time: Option<DateTime<Utc>>,
}

impl Message {
    /// Earliest instant at which the message can be claimed.
    pub fn available_at(&self) -> DateTime<Utc> {
        self.scheduled_time.unwrap_or(self.created_time)
    }

    /// Whether `pull` may claim this message at `now`.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.available_at() <= now
    }

    /// Whether the message has been mutated since it was created.
    pub fn was_updated(&self) -> bool {
        self.update_time != self.created_time
    }
}

/// Formats a timestamp the way it is stored and exchanged.
///
/// The fixed width (microseconds, `Z` suffix) makes lexical order match
/// chronological order, which the SQL claim query relies on.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

/// Whether `ts` formats as a four-digit year, so its stored form keeps the
/// fixed width the lexical ordering depends on.
pub fn is_storable_timestamp(ts: &DateTime<Utc>) -> bool {
    (0..=9999).contains(&ts.year())
}
