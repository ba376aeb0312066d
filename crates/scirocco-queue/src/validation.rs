//! Creation-time sanitization and validation.
//!
//! [`validate_new_message`] turns what a producer sent into a complete
//! [`Message`] or reports every offending field at once. Fields the server
//! owns (`tries` and the audit timestamps) are accepted on input only so the
//! policy that drops them is explicit; none of them reach the result.

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use scirocco_types::{
    is_storable_timestamp, parse_timestamp, Message, MessageId, MessageStatus, Payload,
};
use serde::Serialize;
use thiserror::Error;

/// Field name used for the producer identity.
pub const FIELD_FROM: &str = "from";
/// Field name used for the recipient identity.
pub const FIELD_TO: &str = "to";
/// Field name used for the requested status.
pub const FIELD_STATUS: &str = "status";
/// Field name used for the requested scheduled time.
pub const FIELD_SCHEDULED_TIME: &str = "scheduled_time";
/// Field name used for the message body.
pub const FIELD_PAYLOAD: &str = "payload";

/// Field-keyed validation failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[serde(transparent)]
#[error("validation failed: {}", describe(.fields))]
pub struct ValidationErrors {
    fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure for `field`. The first reason recorded for a field wins.
    pub fn add(&mut self, field: &str, reason: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_insert_with(|| reason.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Iterates over `(field, reason)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn describe(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(field, reason)| format!("{field}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Server-owned fields a client may have tried to set.
///
/// Values are kept raw; they are never parsed or stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemFields {
    pub tries: Option<String>,
    pub created_time: Option<String>,
    pub update_time: Option<String>,
    pub processing_time: Option<String>,
    pub processed_time: Option<String>,
    pub error_time: Option<String>,
}

impl SystemFields {
    /// Names of the fields that were supplied.
    pub fn supplied(&self) -> Vec<&'static str> {
        [
            ("tries", &self.tries),
            ("created_time", &self.created_time),
            ("update_time", &self.update_time),
            ("processing_time", &self.processing_time),
            ("processed_time", &self.processed_time),
            ("error_time", &self.error_time),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_ref().map(|_| name))
        .collect()
    }
}

/// Raw creation request, as decoded from the protocol envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewMessage {
    pub from: Option<String>,
    pub to: Option<String>,
    pub status: Option<String>,
    pub scheduled_time: Option<String>,
    pub payload: Payload,
    /// Client attempts to set server-owned fields. Always discarded.
    pub system: SystemFields,
    /// Failures already found while decoding the envelope (e.g. a malformed body).
    pub envelope_errors: ValidationErrors,
}

impl NewMessage {
    /// Convenience constructor for the common `from`/`to`/payload case.
    pub fn new(from: impl Into<String>, to: impl Into<String>, payload: Payload) -> Self {
        Self {
            from: Some(from.into()),
            to: Some(to.into()),
            payload,
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_scheduled_time(mut self, scheduled_time: impl Into<String>) -> Self {
        self.scheduled_time = Some(scheduled_time.into());
        self
    }
}

fn required_identity(
    value: Option<&str>,
    field: &str,
    errors: &mut ValidationErrors,
) -> Option<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        Some(_) => {
            errors.add(field, format!("{field} must not be empty"));
            None
        }
        None => {
            errors.add(field, format!("{field} is required"));
            None
        }
    }
}

/// Validates a creation request and builds the message to persist.
///
/// The returned message has a fresh id, `tries = 0`,
/// `created_time = update_time = now`, and no processing, processed or error
/// timestamps. A requested `scheduled_time` is honored only for the
/// `scheduled` status.
///
/// # Errors
///
/// Returns every violated field in one [`ValidationErrors`].
pub fn validate_new_message(
    request: &NewMessage,
    now: DateTime<Utc>,
) -> Result<Message, ValidationErrors> {
    let mut errors = request.envelope_errors.clone();

    let from = required_identity(request.from.as_deref(), FIELD_FROM, &mut errors);
    let to = required_identity(request.to.as_deref(), FIELD_TO, &mut errors);

    let status = match MessageStatus::decode_initial(request.status.as_deref()) {
        Ok(status) => Some(status),
        Err(e) => {
            errors.add(FIELD_STATUS, e.to_string());
            None
        }
    };

    let scheduled_time = match (status, request.scheduled_time.as_deref()) {
        (Some(MessageStatus::Scheduled), Some(raw)) => match parse_timestamp(raw.trim()) {
            Ok(ts) if is_storable_timestamp(&ts) => Some(ts.trunc_subsecs(6)),
            Ok(_) => {
                errors.add(
                    FIELD_SCHEDULED_TIME,
                    "scheduled_time must fall between years 0000 and 9999 in UTC",
                );
                None
            }
            Err(e) => {
                errors.add(
                    FIELD_SCHEDULED_TIME,
                    format!("scheduled_time must be an RFC 3339 timestamp: {e}"),
                );
                None
            }
        },
        _ => None,
    };

    let discarded = request.system.supplied();
    if !discarded.is_empty() {
        tracing::debug!(fields = ?discarded, "discarding client-supplied system fields");
    }

    let (Some(from), Some(to), Some(status)) = (from, to, status) else {
        return Err(errors);
    };
    errors.into_result()?;

    Ok(Message {
        id: MessageId::generate(),
        from,
        to,
        status,
        tries: 0,
        payload: request.payload.clone(),
        created_time: now,
        update_time: now,
        scheduled_time,
        processing_time: None,
        processed_time: None,
        error_time: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    fn request() -> NewMessage {
        NewMessage::new("af123", "09af1", Payload::Json(json!({"name": "test"})))
    }

    #[test]
    fn valid_request_is_fully_populated() {
        let message = validate_new_message(&request(), now()).unwrap();
        assert_eq!(message.from, "af123");
        assert_eq!(message.to, "09af1");
        assert_eq!(message.status, MessageStatus::Pending);
        assert_eq!(message.tries, 0);
        assert_eq!(message.created_time, now());
        assert_eq!(message.update_time, now());
        assert_eq!(message.scheduled_time, None);
        assert_eq!(message.processing_time, None);
        assert_eq!(message.processed_time, None);
        assert_eq!(message.error_time, None);
        assert_eq!(message.payload, Payload::Json(json!({"name": "test"})));
    }

    #[test]
    fn missing_from_is_reported() {
        let mut req = request();
        req.from = None;
        let errors = validate_new_message(&req, now()).unwrap_err();
        assert!(errors.contains(FIELD_FROM));
        assert!(!errors.contains(FIELD_TO));
    }

    #[test]
    fn blank_identities_are_rejected() {
        let mut req = request();
        req.from = Some("   ".into());
        req.to = Some(String::new());
        let errors = validate_new_message(&req, now()).unwrap_err();
        assert!(errors.contains(FIELD_FROM));
        assert!(errors.contains(FIELD_TO));
    }

    #[test]
    fn every_violation_is_reported_together() {
        let req = NewMessage {
            status: Some("pendinggggggggggg".into()),
            ..NewMessage::default()
        };
        let errors = validate_new_message(&req, now()).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec![FIELD_FROM, FIELD_STATUS, FIELD_TO]);
    }

    #[test]
    fn recognized_but_disallowed_status_falls_back_to_pending() {
        for word in ["processing", "processed", "error"] {
            let message = validate_new_message(&request().with_status(word), now()).unwrap();
            assert_eq!(message.status, MessageStatus::Pending, "{word}");
        }
    }

    #[test]
    fn scheduled_status_is_honored_with_its_time() {
        let req = request()
            .with_status("scheduled")
            .with_scheduled_time("2024-03-01T10:00:00Z");
        let message = validate_new_message(&req, now()).unwrap();
        assert_eq!(message.status, MessageStatus::Scheduled);
        assert_eq!(
            message.scheduled_time,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn scheduled_time_is_discarded_unless_scheduled() {
        let req = request().with_scheduled_time("2030-01-01T00:00:00Z");
        let message = validate_new_message(&req, now()).unwrap();
        assert_eq!(message.status, MessageStatus::Pending);
        assert_eq!(message.scheduled_time, None);

        // Garbage is also ignored when it would be discarded anyway.
        let req = request().with_scheduled_time("tomorrow");
        assert!(validate_new_message(&req, now()).is_ok());
    }

    #[test]
    fn malformed_scheduled_time_is_rejected_for_scheduled_messages() {
        let req = request()
            .with_status("scheduled")
            .with_scheduled_time("next tuesday");
        let errors = validate_new_message(&req, now()).unwrap_err();
        assert!(errors.contains(FIELD_SCHEDULED_TIME));
    }

    #[test]
    fn scheduled_time_outside_four_digit_years_is_rejected() {
        for raw in ["9999-12-31T23:59:59-23:00", "0000-01-01T00:00:00+00:01"] {
            let req = request().with_status("scheduled").with_scheduled_time(raw);
            let errors = validate_new_message(&req, now()).unwrap_err();
            assert!(errors.contains(FIELD_SCHEDULED_TIME), "{raw}");
        }

        let req = request()
            .with_status("scheduled")
            .with_scheduled_time("9999-12-31T23:59:59Z");
        assert!(validate_new_message(&req, now()).is_ok());
    }

    #[test]
    fn scheduled_time_is_truncated_to_microseconds() {
        let req = request()
            .with_status("scheduled")
            .with_scheduled_time("2024-03-01T10:00:00.123456789Z");
        let message = validate_new_message(&req, now()).unwrap();
        assert_eq!(
            message.scheduled_time,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
                + chrono::Duration::microseconds(123_456))
        );
    }

    #[test]
    fn system_fields_are_discarded() {
        let mut req = request();
        req.system = SystemFields {
            tries: Some("23".into()),
            created_time: Some("1999-01-01T00:00:00Z".into()),
            update_time: Some("2000-01-01T00:00:00Z".into()),
            processing_time: Some("2000-01-01T00:00:00Z".into()),
            processed_time: Some("2000-01-01T00:00:00Z".into()),
            error_time: Some("2000-01-01T00:00:00Z".into()),
        };
        assert_eq!(req.system.supplied().len(), 6);

        let message = validate_new_message(&req, now()).unwrap();
        assert_eq!(message.tries, 0);
        assert_eq!(message.created_time, now());
        assert_eq!(message.update_time, now());
        assert!(message.processing_time.is_none());
        assert!(message.processed_time.is_none());
        assert!(message.error_time.is_none());
    }

    #[test]
    fn envelope_errors_are_merged() {
        let mut req = request();
        req.envelope_errors.add(FIELD_PAYLOAD, "body is not valid JSON");
        req.status = Some("bogus".into());
        let errors = validate_new_message(&req, now()).unwrap_err();
        assert!(errors.contains(FIELD_PAYLOAD));
        assert!(errors.contains(FIELD_STATUS));
    }

    #[test]
    fn identities_are_trimmed() {
        let mut req = request();
        req.from = Some("  af123 ".into());
        let message = validate_new_message(&req, now()).unwrap();
        assert_eq!(message.from, "af123");
    }

    #[test]
    fn errors_serialize_as_field_map() {
        let mut errors = ValidationErrors::new();
        errors.add(FIELD_FROM, "from is required");
        errors.add(FIELD_FROM, "ignored second reason");
        let value = serde_json::to_value(&errors).unwrap();
        assert_eq!(value, json!({"from": "from is required"}));
        assert_eq!(errors.to_string(), "validation failed: from: from is required");

        errors.add(FIELD_TO, "to is required");
        assert_eq!(
            errors.to_string(),
            "validation failed: from: from is required; to: to is required"
        );
    }
}
