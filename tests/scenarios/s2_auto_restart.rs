//! S2: a backend that crashes shortly after spawn is restarted up to
//! `max_restarts` times, with `restart_delay_seconds` between attempts,
//! before settling `failed` once the cap is reached.

use std::time::Duration;

use llamactld::config::{BackendConfiguration, BackendsConfiguration, LogRotationConfiguration};
use llamactld::instance::status::Status;
use llamactld::instance::Instance;

use crate::support::{backend_options_with, fake_backend_path, reserve_port_range, wait_for};

#[tokio::test]
async fn auto_restart_retries_up_to_max_then_settles_failed() {
    let dir = tempfile::tempdir().unwrap();
    let mut backends = BackendsConfiguration::default();
    backends.llama_cpp = BackendConfiguration {
        command: Some(fake_backend_path().to_string_lossy().into_owned()),
        ..Default::default()
    };

    let (port, _) = reserve_port_range(1);
    let mut options = backend_options_with(&[("fail-after-ms", "100")], |o| {
        o.auto_restart = Some(true);
        o.max_restarts = 2;
        o.restart_delay_seconds = 1;
    });
    options.backend.set_port(port);

    let instance = Instance::new(
        "flaky".into(),
        options,
        backends,
        dir.path(),
        LogRotationConfiguration::default(),
        "local".into(),
    )
    .unwrap();

    instance.start().await.unwrap();
    assert_eq!(instance.status(), Status::Running);

    // Two crash-restart cycles (~100ms crash + 1s delay apiece) then a third
    // crash that exhausts max_restarts and stays failed.
    let settled = wait_for(Duration::from_secs(15), || {
        instance.status() == Status::Failed && instance.restart_counter() == 2
    })
    .await;

    assert!(
        settled,
        "expected the instance to settle failed after exhausting restarts, last status = {:?}, restarts = {}",
        instance.status(),
        instance.restart_counter()
    );
}

#[tokio::test]
async fn auto_restart_disabled_stays_failed_after_first_crash() {
    let dir = tempfile::tempdir().unwrap();
    let mut backends = BackendsConfiguration::default();
    backends.llama_cpp = BackendConfiguration {
        command: Some(fake_backend_path().to_string_lossy().into_owned()),
        ..Default::default()
    };

    let (port, _) = reserve_port_range(1);
    let mut options = backend_options_with(&[("fail-after-ms", "100")], |o| {
        o.auto_restart = Some(false);
    });
    options.backend.set_port(port);

    let instance = Instance::new(
        "no-restart".into(),
        options,
        backends,
        dir.path(),
        LogRotationConfiguration::default(),
        "local".into(),
    )
    .unwrap();

    instance.start().await.unwrap();

    let failed = wait_for(Duration::from_secs(5), || instance.status() == Status::Failed).await;
    assert!(failed, "expected the instance to fail after the crash");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(instance.status(), Status::Failed);
    assert_eq!(instance.restart_counter(), 0);
}
