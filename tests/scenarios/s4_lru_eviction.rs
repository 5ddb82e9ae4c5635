//! S4: with `max_running_instances = 1` and LRU eviction enabled, starting a
//! second instance evicts the least-recently-active idle one; starting a
//! third while the survivor has an inflight request fails
//! `CapacityExhausted` because there is no idle victim left to evict.

use std::time::Duration;

use axum::body::Body;
use axum::http::Request;

use llamactld::error::SupervisorError;
use llamactld::instance::status::Status;

use crate::support::{backend_options, Harness};

fn get_request() -> Request<Body> {
    Request::builder().method("GET").uri("/v1/models").body(Body::empty()).unwrap()
}

#[tokio::test]
async fn evicts_lru_idle_instance_then_refuses_when_none_is_idle() {
    let harness = Harness::with_config(|c| {
        c.instances.max_running_instances = 1;
        c.instances.enable_lru_eviction = true;
    })
    .await;

    harness.supervisor.create("a".into(), backend_options(&[]), None).await.unwrap();
    harness.supervisor.start("a").await.unwrap();
    assert_eq!(harness.supervisor.get("a").unwrap().status, Status::Running);

    // Starting "b" while at the cap of 1 evicts "a", the only idle entry.
    harness
        .supervisor
        .create("b".into(), backend_options(&[("response-delay-ms", "1000")]), None)
        .await
        .unwrap();
    harness.supervisor.start("b").await.unwrap();

    assert_eq!(harness.supervisor.get("a").unwrap().status, Status::Stopped);
    assert_eq!(harness.supervisor.get("b").unwrap().status, Status::Running);

    // Hold a request against "b" in flight, then try to start "c" — with "b"
    // busy and "a" already stopped (not tracked as running), there is no
    // idle running instance left to evict.
    let supervisor = harness.supervisor.clone();
    let inflight = tokio::spawn(async move { supervisor.proxy("b", get_request()).await });

    // Give the proxied request time to reach "b" and register as inflight,
    // well inside its 1000ms response delay.
    tokio::time::sleep(Duration::from_millis(300)).await;

    harness.supervisor.create("c".into(), backend_options(&[]), None).await.unwrap();
    let err = harness.supervisor.start("c").await.unwrap_err();
    assert!(matches!(err, SupervisorError::CapacityExhausted));

    let response = inflight.await.unwrap().unwrap();
    assert_eq!(response.status().as_u16(), 200);
}
