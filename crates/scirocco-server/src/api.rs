//! API handlers for the message queue.

use crate::headers::{self, MessageHeaders};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Extension, Json, Path},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use scirocco_queue::validation::FIELD_FROM;
use scirocco_queue::{QueueEngine, QueueError, ValidationErrors};
use scirocco_types::{Message, MessageId};
use std::sync::Arc;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(ValidationErrors),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Validation(errors) => ApiError::Validation(errors),
            QueueError::NotFound(_) => ApiError::NotFound(err.to_string()),
            QueueError::InvalidStateTransition { .. } => ApiError::Conflict(err.to_string()),
            QueueError::RetryOutOfRange { .. } => {
                tracing::error!(error = %err, "queue.retry_delay_secs is out of range");
                ApiError::InternalServerError("retry could not be scheduled".to_string())
            }
            QueueError::Store(e) => {
                tracing::error!(error = %e, "message store failure");
                ApiError::InternalServerError("storage failure".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "errors": errors }),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({ "error": msg })),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, serde_json::json!({ "error": msg })),
            ApiError::InternalServerError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": msg }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Runs an engine operation on the blocking pool.
async fn with_engine<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&QueueEngine) -> Result<T, QueueError> + Send + 'static,
    T: Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || op(&engine))
        .await
        .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?
        .map_err(ApiError::from)
}

/// Unknown and malformed ids are indistinguishable to the client.
fn parse_id(raw: &str) -> Result<MessageId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("message not found: {raw}")))
}

/// Metadata headers plus the stored payload as the body.
fn message_response(status: StatusCode, message: &Message) -> Result<Response, ApiError> {
    let body = message
        .payload
        .encode()
        .map_err(|e| ApiError::InternalServerError(format!("failed to encode payload: {e}")))?;

    let mut response = (status, body).into_response();
    let response_headers = response.headers_mut();
    MessageHeaders::from_message(message).encode(response_headers);
    response_headers.insert(header::CONTENT_TYPE, headers::content_type_for(&message.payload));
    Ok(response)
}

/// Handler for `POST /messageQueue`.
pub async fn push_handler(
    Extension(state): Extension<Arc<AppState>>,
    request_headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload = headers::decode_body(&request_headers, &body);
    let request = MessageHeaders::decode(&request_headers).into_new_message(payload);

    let message = with_engine(&state, move |engine| engine.push(request)).await?;

    let mut response = message_response(StatusCode::CREATED, &message)?;
    let location = format!("/messages/{}", message.id.to_hex());
    let location = HeaderValue::from_str(&location)
        .map_err(|e| ApiError::InternalServerError(format!("invalid location header: {e}")))?;
    response.headers_mut().insert(header::LOCATION, location);
    Ok(response)
}

/// Handler for `GET /messageQueue`.
///
/// Claims the next eligible message addressed to the `Scirocco-From` identity.
pub async fn pull_handler(
    Extension(state): Extension<Arc<AppState>>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    let decoded = MessageHeaders::decode(&request_headers);
    decoded
        .unreadable_errors(&[FIELD_FROM])
        .into_result()
        .map_err(ApiError::Validation)?;
    let recipient = decoded.from.unwrap_or_default();

    let claimed = with_engine(&state, move |engine| engine.pull(&recipient)).await?;
    match claimed {
        Some(message) => message_response(StatusCode::OK, &message),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Handler for `GET /messages/{id}`.
pub async fn fetch_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let message = with_engine(&state, move |engine| engine.fetch(&id)).await?;
    message_response(StatusCode::OK, &message)
}

/// Handler for `PATCH /messageQueue/{id}/ack` and `PATCH /messages/{id}/ack`.
pub async fn ack_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let message = with_engine(&state, move |engine| engine.ack(&id)).await?;
    message_response(StatusCode::OK, &message)
}

/// Handler for `PATCH /messageQueue/{id}/nack` and `PATCH /messages/{id}/nack`.
pub async fn nack_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let message = with_engine(&state, move |engine| engine.nack(&id)).await?;
    message_response(StatusCode::OK, &message)
}
