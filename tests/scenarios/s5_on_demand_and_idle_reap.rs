//! S5: `on_demand_start` launches a stopped instance on its first proxied
//! request, waits for it to become healthy, then forwards the request. The
//! idle reaper later stops it once `idle_timeout_minutes` of inactivity has
//! passed.

use std::time::Duration;

use axum::body::Body;
use axum::http::Request;

use llamactld::instance::status::Status;

use crate::support::{backend_options, backend_options_with, wait_for, Harness};

fn get_request() -> Request<Body> {
    Request::builder().method("GET").uri("/v1/models").body(Body::empty()).unwrap()
}

#[tokio::test]
async fn on_demand_start_launches_waits_healthy_and_forwards() {
    let harness = Harness::new().await;

    harness
        .supervisor
        .create(
            "lazy".into(),
            backend_options_with(&[], |o| {
                o.on_demand_start = true;
            }),
            None,
        )
        .await
        .unwrap();
    assert_eq!(harness.supervisor.get("lazy").unwrap().status, Status::Stopped);

    let response = harness.supervisor.proxy("lazy", get_request()).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(harness.supervisor.get("lazy").unwrap().status, Status::Running);
}

#[tokio::test]
async fn proxy_without_on_demand_start_fails_not_running() {
    let harness = Harness::new().await;

    harness.supervisor.create("strict".into(), backend_options(&[]), None).await.unwrap();

    let err = harness.supervisor.proxy("strict", get_request()).await.unwrap_err();
    assert!(matches!(err, llamactld::error::SupervisorError::NotRunning(_)));
}

/// The idle-timeout clock has whole-minute granularity (`should_timeout`
/// compares against `idle_timeout_minutes * 60`), so exercising an actual
/// reap means outlasting a full minute of real wall-clock time.
#[tokio::test]
#[ignore = "exercises the real 61+ second wall-clock minute-granularity idle timeout"]
async fn idle_instance_is_reaped_after_real_wait() {
    let harness = Harness::with_config(|c| {
        c.instances.timeout_check_interval_minutes = 1;
    })
    .await;

    harness
        .supervisor
        .create(
            "idle-one".into(),
            backend_options_with(&[], |o| {
                o.on_demand_start = true;
                o.idle_timeout_minutes = 1;
            }),
            None,
        )
        .await
        .unwrap();

    harness.supervisor.proxy("idle-one", get_request()).await.unwrap();
    assert_eq!(harness.supervisor.get("idle-one").unwrap().status, Status::Running);

    let _reaper = harness.supervisor.spawn_idle_reaper();
    let stopped = wait_for(Duration::from_secs(150), || {
        harness
            .supervisor
            .get("idle-one")
            .map(|s| s.status == Status::Stopped)
            .unwrap_or(false)
    })
    .await;

    assert!(stopped, "expected the idle reaper to stop the instance after its idle timeout elapsed");
}
