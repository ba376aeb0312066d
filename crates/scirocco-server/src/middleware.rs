use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::AppState;

/// Middleware to authenticate requests against the configured master token.
///
/// The `Authorization` header may carry the token bare or as
/// `Bearer <token>`.
pub async fn auth_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_str()
        .map_err(|_| StatusCode::UNAUTHORIZED)?
        .trim();
    let presented = presented.strip_prefix("Bearer ").unwrap_or(presented);

    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    if presented.is_empty() || presented != state.master_token {
        tracing::debug!(
            method = %req.method(),
            path = req.uri().path(),
            "rejected request with invalid credentials"
        );
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(req).await)
}
