#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use chrono::{TimeZone, Utc};
use scirocco_db::{create_pool, run_migrations, DbRuntimeSettings};
use scirocco_queue::{ManualClock, QueueEngine, QueuePolicy, SqliteStore};
use scirocco_server::{app, AppState};
use std::sync::Arc;
use tower::ServiceExt;

pub const TOKEN: &str = "test-master-token";

pub struct TestApp {
    pub router: Router,
    pub engine: Arc<QueueEngine>,
    pub clock: Arc<ManualClock>,
    _dir: tempfile::TempDir,
}

pub fn test_app() -> TestApp {
    test_app_with(QueuePolicy::default())
}

pub fn test_app_with(policy: QueuePolicy) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("scirocco.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default())
        .expect("failed to create pool");
    run_migrations(&pool.get().unwrap()).expect("failed to run migrations");

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap(),
    ));
    let engine = Arc::new(QueueEngine::new(
        Arc::new(SqliteStore::new(pool)),
        clock.clone(),
        policy,
    ));
    let router = app(AppState {
        engine: Arc::clone(&engine),
        master_token: TOKEN.to_string(),
    });

    TestApp {
        router,
        engine,
        clock,
        _dir: dir,
    }
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }
}

/// `POST /messageQueue` with auth and the given identity headers set.
pub fn push_builder(from: Option<&str>, to: Option<&str>) -> axum::http::request::Builder {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/messageQueue")
        .header("Authorization", TOKEN);
    if let Some(from) = from {
        builder = builder.header("Scirocco-From", from);
    }
    if let Some(to) = to {
        builder = builder.header("Scirocco-To", to);
    }
    builder
}

pub fn push_json(from: &str, to: &str, body: &str) -> Request<Body> {
    push_builder(Some(from), Some(to))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn pull_request(recipient: &str) -> Request<Body> {
    Request::builder()
        .uri("/messageQueue")
        .header("Authorization", TOKEN)
        .header("Scirocco-From", recipient)
        .body(Body::empty())
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", TOKEN)
        .body(Body::empty())
        .unwrap()
}

pub fn patch_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("Authorization", TOKEN)
        .body(Body::empty())
        .unwrap()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
