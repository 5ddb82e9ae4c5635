//! Shared harness for the scenario specs: a [`Supervisor`] wired to
//! [`fake_backend`](crate::fake_backend_path), the stand-in inference
//! server built alongside the daemon for exactly this purpose.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use llamactld::backend::{BackendOptions, LlamaCppOptions};
use llamactld::config::{BackendConfiguration, Configuration};
use llamactld::instance::options::Options;
use llamactld::persistence::PersistenceStore;
use llamactld::Supervisor;

/// Path to the `fake_backend` fixture binary, built by cargo alongside the
/// `scenarios` test binary.
pub fn fake_backend_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fake_backend"))
}

/// Scenario tests in this binary run concurrently and each spawns real
/// subprocesses bound to real ports, so every harness (and every
/// hand-built `Instance` that bypasses one) needs its own disjoint slice
/// of the ephemeral range rather than all racing for the same low port.
static NEXT_PORT_BASE: AtomicU16 = AtomicU16::new(19000);

pub fn reserve_port_range(width: u16) -> (u16, u16) {
    let base = NEXT_PORT_BASE.fetch_add(width, Ordering::SeqCst);
    (base, base + width - 1)
}

/// A supervisor wired to a temp-dir-backed in-memory store and a narrow
/// port range, with `llama_cpp` instances launching `fake_backend` instead
/// of a real `llama-server`. Keeps the backing temp directory alive for the
/// harness's lifetime.
pub struct Harness {
    pub supervisor: Arc<Supervisor>,
    pub persistence: Arc<PersistenceStore>,
    pub port_range: (u16, u16),
    _data_dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut Configuration)) -> Self {
        let data_dir = tempfile::tempdir().unwrap();
        let (port_lo, port_hi) = reserve_port_range(20);

        let mut config = Configuration::default();
        config.system.data_directory = data_dir.path().join("data");
        config.system.instances_directory = data_dir.path().join("instances");
        config.system.logs_directory = data_dir.path().join("logs");
        std::fs::create_dir_all(&config.system.logs_directory).unwrap();

        config.instances.port_range_low = port_lo;
        config.instances.port_range_high = port_hi;
        config.backends.llama_cpp = BackendConfiguration {
            command: Some(fake_backend_path().to_string_lossy().into_owned()),
            ..Default::default()
        };
        customize(&mut config);

        let persistence = Arc::new(PersistenceStore::open_in_memory().unwrap());
        let supervisor = Supervisor::new(Arc::new(config), persistence.clone()).await.unwrap();

        Self {
            supervisor,
            persistence,
            port_range: (port_lo, port_hi),
            _data_dir: data_dir,
        }
    }
}

/// An `llama_cpp` options record targeting `fake_backend`, with the given
/// `--flag value` pairs threaded through as `extra_args` so the fixture
/// binary sees them on its argv.
pub fn backend_options(extra_args: &[(&str, &str)]) -> Options {
    let mut extras: HashMap<String, Vec<String>> = HashMap::new();
    for (k, v) in extra_args {
        extras.entry((*k).to_string()).or_default().push((*v).to_string());
    }

    Options {
        auto_restart: None,
        max_restarts: 0,
        restart_delay_seconds: 0,
        on_demand_start: false,
        idle_timeout_minutes: 0,
        environment: HashMap::new(),
        nodes: Default::default(),
        backend: BackendOptions::LlamaCpp(LlamaCppOptions {
            model: "test-model".into(),
            host: "127.0.0.1".into(),
            port: 0,
            extra_args: extras,
            ..Default::default()
        }),
    }
}

/// Like [`backend_options`], with further record-level fields (restart
/// policy, idle timeout, on-demand start) set by `customize` — the fields
/// `backend_options` always leaves at their "off" defaults.
pub fn backend_options_with(extra_args: &[(&str, &str)], customize: impl FnOnce(&mut Options)) -> Options {
    let mut options = backend_options(extra_args);
    customize(&mut options);
    options
}

/// Poll `condition` every 20ms until it returns `true` or `timeout` elapses.
pub async fn wait_for<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if condition() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
