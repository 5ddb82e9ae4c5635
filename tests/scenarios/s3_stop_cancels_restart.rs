//! S3: calling `Stop` while a restart timer is pending cancels the pending
//! respawn; the instance settles `stopped`, not `running`.

use std::time::Duration;

use llamactld::config::{BackendConfiguration, BackendsConfiguration, LogRotationConfiguration};
use llamactld::instance::status::Status;
use llamactld::instance::Instance;

use crate::support::{backend_options_with, fake_backend_path, reserve_port_range, wait_for};

#[tokio::test]
async fn stop_cancels_pending_restart_timer() {
    let dir = tempfile::tempdir().unwrap();
    let mut backends = BackendsConfiguration::default();
    backends.llama_cpp = BackendConfiguration {
        command: Some(fake_backend_path().to_string_lossy().into_owned()),
        ..Default::default()
    };

    let (port, _) = reserve_port_range(1);
    let mut options = backend_options_with(&[("fail-after-ms", "100")], |o| {
        o.auto_restart = Some(true);
        o.max_restarts = 5;
        o.restart_delay_seconds = 5;
    });
    options.backend.set_port(port);

    let instance = Instance::new(
        "flaky-stop".into(),
        options,
        backends,
        dir.path(),
        LogRotationConfiguration::default(),
        "local".into(),
    )
    .unwrap();

    instance.start().await.unwrap();

    let reached_restarting = wait_for(Duration::from_secs(5), || instance.status() == Status::Restarting).await;
    assert!(reached_restarting, "expected the instance to enter restarting after the crash");

    instance.stop().await.unwrap();
    assert_eq!(instance.status(), Status::Stopped);

    // The cancelled restart must never respawn: outlast restart_delay_seconds
    // and confirm the instance stayed put.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(instance.status(), Status::Stopped);
    assert_eq!(instance.restart_counter(), 1);
}
