//! Process runner: owns one OS subprocess — spawn, pipe capture,
//! signal, reap, and the auto-restart loop.

use std::process::Stdio;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;
use crate::instance::log_sink::LogSink;
use crate::instance::options::OptionsCell;
use crate::instance::status::{Status, StatusCell};

const STOP_GRACE: Duration = Duration::from_secs(30);
const KILL_GRACE: Duration = Duration::from_secs(2);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);
const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the runner needs to build a child's argv/env without knowing
/// the backend's flags — supplied by the instance that owns this runner.
pub struct LaunchSpec {
    pub command: String,
    pub base_args: Vec<String>,
    pub backend_args: Vec<String>,
    pub environment: Vec<(String, String)>,
}

struct RunningChild {
    pid: i32,
}

/// Owns one OS subprocess for an instance. Never touched directly by
/// anything outside [`crate::instance::Instance`].
pub type SpecBuilder = dyn Fn() -> LaunchSpec + Send + Sync;

pub struct ProcessRunner {
    name: String,
    status: Arc<StatusCell>,
    options: Arc<OptionsCell>,
    log_sink: Arc<LogSink>,
    child: Mutex<Option<RunningChild>>,
    restart_counter: AtomicU32,
    restart_cancel: Mutex<Option<CancellationToken>>,
    reaped: Mutex<Arc<Notify>>,
    http: reqwest::Client,
    spec_builder: Arc<SpecBuilder>,
    last_start_ts: AtomicI64,
}

impl ProcessRunner {
    pub fn new(
        name: String,
        status: Arc<StatusCell>,
        options: Arc<OptionsCell>,
        log_sink: Arc<LogSink>,
        spec_builder: Arc<SpecBuilder>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HEALTH_REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with static config never fails to build");

        Self {
            name,
            status,
            options,
            log_sink,
            child: Mutex::new(None),
            restart_counter: AtomicU32::new(0),
            restart_cancel: Mutex::new(None),
            reaped: Mutex::new(Arc::new(Notify::new())),
            http,
            spec_builder,
            last_start_ts: AtomicI64::new(0),
        }
    }

    pub fn restart_counter(&self) -> u32 {
        self.restart_counter.load(Ordering::SeqCst)
    }

    /// Unix-seconds of the most recent successful spawn. Combined with the
    /// proxy's `last_request_ts` as the LRU eviction key so a freshly
    /// started but unused instance isn't evicted immediately.
    pub fn last_start_ts(&self) -> i64 {
        self.last_start_ts.load(Ordering::SeqCst)
    }

    /// Fails if already running/restarting/shutting down. On success,
    /// status becomes `running` and a monitor task owns the child from
    /// here on. Manual `start()` resets the restart counter.
    pub async fn start(self: &Arc<Self>, spec: LaunchSpec) -> Result<(), SupervisorError> {
        self.restart_counter.store(0, Ordering::SeqCst);
        self.start_inner(spec, false).await
    }

    /// `from_restart` is set by the auto-restart path, which calls this
    /// while `status` is still `Restarting` (the delay having just
    /// elapsed) so that its own respawn isn't rejected by the guard below;
    /// a manual `start()` still rejects `Restarting` like any other
    /// already-active state.
    async fn start_inner(self: &Arc<Self>, spec: LaunchSpec, from_restart: bool) -> Result<(), SupervisorError> {
        let current = self.status.get();
        let already_active = if from_restart {
            matches!(current, Status::Running | Status::ShuttingDown)
        } else {
            matches!(current, Status::Running | Status::Restarting | Status::ShuttingDown)
        };
        if already_active {
            return Err(SupervisorError::AlreadyRunning(self.name.clone()));
        }

        let mut argv = spec.base_args;
        argv.extend(spec.backend_args);

        let mut cmd = Command::new(&spec.command);
        cmd.args(&argv)
            .envs(spec.environment.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| SupervisorError::Spawn(self.name.clone(), e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::Spawn(self.name.clone(), "child exited before pid was observed".into()))?
            as i32;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        *self.child.lock() = Some(RunningChild { pid });
        let notify = Arc::new(Notify::new());
        *self.reaped.lock() = notify.clone();

        self.status.set(Status::Running);
        self.last_start_ts.store(now_unix(), Ordering::SeqCst);
        tracing::info!(instance = %self.name, pid, "instance started");

        if let Some(stdout) = stdout {
            self.spawn_pipe_reader(stdout);
        }
        if let Some(stderr) = stderr {
            self.spawn_pipe_reader(stderr);
        }

        let runner = self.clone();
        tokio::spawn(async move {
            runner.monitor(child, notify).await;
        });

        Ok(())
    }

    fn spawn_pipe_reader<R>(&self, pipe: R)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let log_sink = self.log_sink.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut data = line.into_bytes();
                data.push(b'\n');
                log_sink.write(&data);
            }
        });
    }

    /// Awaits the child's exit, then either finalizes a `stop()`-initiated
    /// reap or runs the auto-restart algorithm for an unexpected exit.
    async fn monitor(self: Arc<Self>, mut child: tokio::process::Child, notify: Arc<Notify>) {
        let wait_result = child.wait().await;
        *self.child.lock() = None;

        if self.status.get() == Status::ShuttingDown {
            // stop() owns finalizing status/log-sink teardown; just signal reap.
            notify.notify_one();
            return;
        }

        let exit_ok = matches!(wait_result, Ok(status) if status.success());
        tracing::warn!(instance = %self.name, success = exit_ok, "instance exited unexpectedly");

        self.status.set(Status::Failed);

        if exit_ok {
            // Clean exits never trigger restart; a self-terminating clean
            // exit outside an explicit stop() settles as stopped.
            self.status.set(Status::Stopped);
            return;
        }

        let options = self.options.get();
        // Resolved to Some(_) by Options::validate_and_default; unwrap_or
        // is only a defensive fallback for options built outside that path.
        let auto_restart = options.auto_restart.unwrap_or(false);
        if !auto_restart {
            tracing::info!(instance = %self.name, "auto_restart disabled, staying failed");
            return;
        }

        if self.restart_counter.load(Ordering::SeqCst) >= options.max_restarts {
            tracing::warn!(instance = %self.name, max_restarts = options.max_restarts, "restart cap reached, staying failed");
            return;
        }

        self.restart_counter.fetch_add(1, Ordering::SeqCst);
        self.status.set(Status::Restarting);

        let cancel = CancellationToken::new();
        *self.restart_cancel.lock() = Some(cancel.clone());

        let delay = Duration::from_secs(options.restart_delay_seconds as u64);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                tracing::info!(instance = %self.name, "pending restart cancelled by stop()");
                return;
            }
        }
        *self.restart_cancel.lock() = None;

        tracing::info!(instance = %self.name, attempt = self.restart_counter.load(Ordering::SeqCst), "auto-restarting");

        // Respawn directly from Restarting -> Running; the §4.6 DAG has no
        // Restarting -> Failed edge, so a failed respawn attempt here lands
        // on Failed without passing back through Running.
        let spec = (self.spec_builder)();
        if let Err(e) = self.start_inner(spec, true).await {
            tracing::error!(instance = %self.name, error = %e, "auto-restart failed to respawn");
            self.status.set(Status::Failed);
        }
    }

    /// Requires `running`/`restarting`. Cancels any pending restart timer,
    /// sends SIGINT to the process group, waits up to 30s for reap, then
    /// escalates to SIGKILL and waits up to 2s more.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        if let Some(token) = self.restart_cancel.lock().take() {
            token.cancel();
        }

        let current = self.status.get();
        if !current.is_running() {
            return Err(SupervisorError::NotRunning(self.name.clone()));
        }

        self.status.set(Status::ShuttingDown);

        let notify = self.reaped.lock().clone();
        let pid = self.child.lock().as_ref().map(|c| c.pid);

        if let Some(pid) = pid {
            self.signal_group(pid, Signal::SIGINT);

            let reaped = tokio::time::timeout(STOP_GRACE, notify.notified()).await;
            if reaped.is_err() {
                tracing::warn!(instance = %self.name, "graceful stop timed out, sending SIGKILL");
                self.signal_group(pid, Signal::SIGKILL);
                let _ = tokio::time::timeout(KILL_GRACE, notify.notified()).await;
            }
        }

        self.log_sink.close();
        self.status.set(Status::Stopped);
        tracing::info!(instance = %self.name, "instance stopped");
        Ok(())
    }

    fn signal_group(&self, pid: i32, signal: Signal) {
        // The child was spawned into its own process group (pgid == pid),
        // so the group leader's pid negated addresses the whole group.
        if let Err(e) = killpg(Pid::from_raw(pid), signal) {
            tracing::warn!(instance = %self.name, pid, %signal, error = %e, "failed to signal process group");
        }
    }

    /// Polls `GET http://host:port/health` every 1s (5s per-request
    /// timeout) until the first `200` or the overall timeout elapses.
    pub async fn wait_healthy(&self, timeout_s: Option<u64>) -> Result<(), SupervisorError> {
        let overall = timeout_s.map(Duration::from_secs).unwrap_or(DEFAULT_HEALTH_TIMEOUT);
        let options = self.options.get();
        let url = format!("http://{}:{}/health", options.get_host(), options.get_port());

        let probe = async {
            loop {
                match self.http.get(&url).send().await {
                    Ok(resp) if resp.status().is_success() => return,
                    _ => tokio::time::sleep(HEALTH_POLL_INTERVAL).await,
                }
            }
        };

        tokio::time::timeout(overall, probe)
            .await
            .map_err(|_| SupervisorError::HealthTimeout(self.name.clone()))
    }

    pub fn pid(&self) -> Option<i32> {
        self.child.lock().as_ref().map(|c| c.pid)
    }
}

fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
