mod common;

use axum::http::StatusCode;
use common::*;
use scirocco_queue::QueuePolicy;
use scirocco_server::background;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn expired_claims_return_to_the_queue() {
    let app = test_app_with(QueuePolicy {
        lease_timeout: Some(Duration::from_secs(60)),
        ..QueuePolicy::default()
    });
    app.send(push_json("af123", "af123", "{}")).await;

    let claimed = app.send(pull_request("af123")).await;
    assert_eq!(claimed.status(), StatusCode::OK);
    let id = header(&claimed, "scirocco-id").unwrap().to_string();

    app.clock.advance(chrono::Duration::seconds(30));
    assert_eq!(background::run_once(&app.engine).await, 0);
    assert_eq!(
        app.send(pull_request("af123")).await.status(),
        StatusCode::NO_CONTENT
    );

    app.clock.advance(chrono::Duration::seconds(30));
    assert_eq!(background::run_once(&app.engine).await, 1);

    let reclaimed = app.send(pull_request("af123")).await;
    assert_eq!(reclaimed.status(), StatusCode::OK);
    assert_eq!(header(&reclaimed, "scirocco-id"), Some(id.as_str()));
    assert_eq!(header(&reclaimed, "scirocco-tries"), Some("2"));
}

#[tokio::test]
async fn reaper_exits_without_a_lease_timeout() {
    let app = test_app();
    // Returns immediately instead of looping forever.
    tokio::time::timeout(
        Duration::from_secs(5),
        background::start_lease_reaper(Arc::clone(&app.engine), 1),
    )
    .await
    .expect("reaper should return when lease expiry is disabled");
}

#[tokio::test]
async fn reaper_loop_releases_on_its_interval() {
    let app = test_app_with(QueuePolicy {
        lease_timeout: Some(Duration::from_secs(10)),
        ..QueuePolicy::default()
    });
    app.send(push_json("af123", "af123", "{}")).await;
    app.send(pull_request("af123")).await;
    app.clock.advance(chrono::Duration::seconds(10));

    let reaper = tokio::spawn(background::start_lease_reaper(Arc::clone(&app.engine), 1));
    let mut released = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let message = app.send(pull_request("af123")).await;
        if message.status() == StatusCode::OK {
            released = true;
            break;
        }
    }
    reaper.abort();
    assert!(released, "reaper should have released the expired claim");
}
