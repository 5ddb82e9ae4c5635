//! Instance: the lifecycle state machine aggregating the status cell,
//! options cell, log sink, process runner and reverse proxy for one named
//! unit, plus local/remote routing.

pub mod log_sink;
pub mod options;
pub mod process;
pub mod proxy;
pub mod status;

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response};

use crate::config::{BackendConfiguration, BackendsConfiguration, LogRotationConfiguration};
use crate::error::SupervisorError;
use log_sink::LogSink;
use options::{Options, OptionsCell};
use process::{LaunchSpec, ProcessRunner};
use proxy::{Proxy, ProxyTarget};
use status::{Status, StatusCell};

/// A named, supervised unit pairing an options record with lifecycle state
/// and, for locally-scheduled instances, a subprocess and reverse proxy.
///
/// A remote instance (`nodes` non-empty and excludes the local node)
/// carries no local subprocess, log sink, or proxy — `process`, `log_sink`
/// and `proxy` are `None` for it. Since `nodes` cannot change via
/// `set_options` (the options cell preserves it across updates), remoteness
/// is decided once, here, at construction.
pub struct Instance {
    name: String,
    status: Arc<StatusCell>,
    options: Arc<OptionsCell>,
    log_sink: Option<Arc<LogSink>>,
    process: Option<Arc<ProcessRunner>>,
    proxy: Option<Arc<Proxy>>,
    backend_config: BackendConfiguration,
    local_node_id: String,
    remote: bool,
}

impl Instance {
    /// Build a new instance. `backends` supplies the command template each
    /// backend type launches with; the instance's own `options.backend`
    /// supplies the flags built on top of it.
    pub fn new(
        name: String,
        options: Options,
        backends: BackendsConfiguration,
        logs_dir: &Path,
        rotation: LogRotationConfiguration,
        local_node_id: String,
    ) -> Result<Arc<Self>, SupervisorError> {
        let status = Arc::new(StatusCell::new(Status::Stopped));
        let remote = options.is_remote(&local_node_id);
        let backend_type = options.backend_type();
        let backend_config = backend_config_for(&backends, backend_type);
        let response_headers = build_response_headers(&backend_config.response_headers);

        let options = Arc::new(OptionsCell::new(options));

        let (log_sink, proxy, process) = if remote {
            (None, None, None)
        } else {
            let log_sink = Arc::new(
                LogSink::open(logs_dir, &name, rotation).map_err(|e| SupervisorError::Internal(e.to_string()))?,
            );
            let proxy = Arc::new(Proxy::new(status.clone(), response_headers));

            let spec_options = options.clone();
            let spec_backend_config = backend_config.clone();
            let spec_builder: Arc<process::SpecBuilder> =
                Arc::new(move || build_launch_spec(&spec_options.get(), &spec_backend_config));

            let process = Arc::new(ProcessRunner::new(
                name.clone(),
                status.clone(),
                options.clone(),
                log_sink.clone(),
                spec_builder,
            ));

            (Some(log_sink), Some(proxy), Some(process))
        };

        let instance = Arc::new(Self {
            name,
            status,
            options,
            log_sink,
            process,
            proxy,
            backend_config,
            local_node_id,
            remote,
        });
        Ok(instance)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    pub fn on_status_change<F>(&self, callback: F)
    where
        F: Fn(Status, Status) + Send + Sync + 'static,
    {
        self.status.on_change(callback);
    }

    pub fn get_options(&self) -> Options {
        self.options.get()
    }

    /// Validates and installs new options, preserving `nodes`, and drops the
    /// cached proxy so the next dispatch rebuilds it against the new target.
    pub fn set_options(&self, mut new_options: Options, defaults: &crate::config::InstancesConfiguration) -> Result<(), SupervisorError> {
        new_options.validate_and_default(defaults)?;
        self.options.set(new_options);
        if let Some(proxy) = &self.proxy {
            proxy.clear();
        }
        Ok(())
    }

    /// Decided once at construction (`nodes` cannot change via update).
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn restart_counter(&self) -> u32 {
        self.process.as_ref().map(|p| p.restart_counter()).unwrap_or(0)
    }

    pub fn pid(&self) -> Option<i32> {
        self.process.as_ref().and_then(|p| p.pid())
    }

    /// Local-only. Fails for a remote instance; the façade routes those to
    /// the remote dispatcher instead.
    pub async fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let process = self.process.as_ref().ok_or(SupervisorError::RemoteNotSupported)?;
        let spec = build_launch_spec(&self.options.get(), &self.backend_config);
        process.start(spec).await
    }

    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let process = self.process.as_ref().ok_or(SupervisorError::RemoteNotSupported)?;
        process.stop().await
    }

    pub async fn restart(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let process = self.process.as_ref().ok_or(SupervisorError::RemoteNotSupported)?;
        if self.status.is_running() {
            // Best-effort stop, ignoring "not running" errors, since a
            // failed instance has no running child to signal.
            let _ = process.stop().await;
        }
        let spec = build_launch_spec(&self.options.get(), &self.backend_config);
        process.start(spec).await
    }

    pub async fn wait_healthy(&self, timeout_s: Option<u64>) -> Result<(), SupervisorError> {
        let process = self.process.as_ref().ok_or(SupervisorError::RemoteNotSupported)?;
        process.wait_healthy(timeout_s).await
    }

    pub fn get_logs(&self, n: i64) -> Result<Vec<String>, SupervisorError> {
        let log_sink = self.log_sink.as_ref().ok_or(SupervisorError::RemoteNotSupported)?;
        Ok(log_sink.tail(n))
    }

    pub fn subscribe_logs(&self) -> Result<tokio::sync::broadcast::Receiver<Vec<u8>>, SupervisorError> {
        let log_sink = self.log_sink.as_ref().ok_or(SupervisorError::RemoteNotSupported)?;
        Ok(log_sink.subscribe())
    }

    /// Forwards a data-plane request through the local proxy. The caller
    /// (the façade) is responsible for remote routing and the on-demand
    /// start gate; this just dispatches against whatever target it is
    /// given.
    pub async fn serve(&self, target: ProxyTarget, request: Request<Body>) -> Result<Response<Body>, SupervisorError> {
        let proxy = self.proxy.as_ref().ok_or(SupervisorError::RemoteNotSupported)?;
        proxy.serve(target, request).await
    }

    pub fn local_target(&self) -> ProxyTarget {
        let options = self.options.get();
        ProxyTarget {
            base_url: format!("http://{}:{}", options.get_host(), options.get_port()),
            api_key: None,
            is_remote: false,
        }
    }

    /// `false` for remote instances: they have no local proxy to age out,
    /// and the local idle reaper never touches them.
    pub fn should_timeout(&self) -> bool {
        let Some(proxy) = &self.proxy else { return false };
        let idle_timeout = self.options.get().idle_timeout_minutes;
        proxy.should_timeout(idle_timeout)
    }

    pub fn inflight_count(&self) -> u32 {
        self.proxy.as_ref().map(|p| p.inflight_count()).unwrap_or(0)
    }

    /// `max(last_request_ts, last_start_ts)` so a freshly started but
    /// unused instance is not immediately LRU-evicted.
    pub fn last_active_ts(&self) -> i64 {
        let request_ts = self.proxy.as_ref().map(|p| p.last_request_ts()).unwrap_or(0);
        let start_ts = self.process.as_ref().map(|p| p.last_start_ts()).unwrap_or(0);
        request_ts.max(start_ts)
    }
}

fn backend_config_for(backends: &BackendsConfiguration, backend_type: crate::backend::BackendType) -> BackendConfiguration {
    match backend_type {
        crate::backend::BackendType::LlamaCpp => backends.llama_cpp.clone(),
        crate::backend::BackendType::MlxLm => backends.mlx_lm.clone(),
        crate::backend::BackendType::Vllm => backends.vllm.clone(),
    }
}

fn build_response_headers(headers: &std::collections::HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        if let (Some(name), Ok(value)) = (proxy::parse_header_name(k), axum::http::HeaderValue::from_str(v)) {
            map.insert(name, value);
        }
    }
    map
}

/// Builds the argv the child is spawned with. When the backend's
/// configuration enables docker execution (and the backend type supports
/// it — `mlx_lm` never does, `build_docker_argv` returns empty for it),
/// the command becomes `docker run` wrapping the backend's docker argv
/// form instead of its native one.
fn build_launch_spec(options: &Options, backend_config: &BackendConfiguration) -> LaunchSpec {
    let mut environment: Vec<(String, String)> = backend_config.environment.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    environment.extend(options.environment.iter().map(|(k, v)| (k.clone(), v.clone())));

    if backend_config.docker.enabled {
        let docker_argv = options.backend.build_docker_argv();
        if !docker_argv.is_empty() {
            let mut argv = vec!["run".to_string(), "--rm".to_string()];
            for (k, v) in &backend_config.docker.environment {
                argv.push("-e".to_string());
                argv.push(format!("{k}={v}"));
            }
            argv.extend(backend_config.docker.args.clone());
            argv.push(backend_config.docker.image.clone());
            argv.extend(docker_argv);
            return LaunchSpec {
                command: "docker".to_string(),
                base_args: Vec::new(),
                backend_args: argv,
                environment,
            };
        }
    }

    let command = backend_config
        .command
        .clone()
        .unwrap_or_else(|| default_command_for(options.backend_type()));

    LaunchSpec {
        command,
        base_args: backend_config.args.clone(),
        backend_args: options.backend.build_argv(),
        environment,
    }
}

fn default_command_for(backend_type: crate::backend::BackendType) -> String {
    match backend_type {
        crate::backend::BackendType::LlamaCpp => "llama-server".into(),
        crate::backend::BackendType::MlxLm => "mlx_lm.server".into(),
        crate::backend::BackendType::Vllm => "vllm".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOptions, LlamaCppOptions, MlxLmOptions};
    use std::collections::{HashMap, HashSet};

    fn opts(backend: BackendOptions, nodes: HashSet<String>) -> Options {
        Options {
            auto_restart: None,
            max_restarts: 0,
            restart_delay_seconds: 0,
            on_demand_start: false,
            idle_timeout_minutes: 0,
            environment: HashMap::new(),
            nodes,
            backend,
        }
    }

    #[test]
    fn remote_instance_has_no_local_resources() {
        let dir = tempfile::tempdir().unwrap();
        let backend = BackendOptions::LlamaCpp(LlamaCppOptions {
            model: "/m.gguf".into(),
            ..Default::default()
        });
        let instance = Instance::new(
            "remote-alpha".into(),
            opts(backend, HashSet::from(["peer-1".to_string()])),
            BackendsConfiguration::default(),
            dir.path(),
            LogRotationConfiguration::default(),
            "local".into(),
        )
        .unwrap();

        assert!(instance.is_remote());
        assert!(instance.log_sink.is_none());
        assert!(instance.proxy.is_none());
        assert!(instance.process.is_none());
        assert!(instance.get_logs(10).is_err());
        assert!(!instance.should_timeout());
        assert_eq!(instance.inflight_count(), 0);
    }

    #[test]
    fn local_instance_builds_all_resources() {
        let dir = tempfile::tempdir().unwrap();
        let backend = BackendOptions::LlamaCpp(LlamaCppOptions {
            model: "/m.gguf".into(),
            ..Default::default()
        });
        let instance = Instance::new(
            "local-alpha".into(),
            opts(backend, HashSet::new()),
            BackendsConfiguration::default(),
            dir.path(),
            LogRotationConfiguration::default(),
            "local".into(),
        )
        .unwrap();

        assert!(!instance.is_remote());
        assert!(instance.log_sink.is_some());
        assert!(instance.proxy.is_some());
        assert!(instance.process.is_some());
    }

    #[test]
    fn docker_launch_spec_used_when_enabled_and_supported() {
        let backend = BackendOptions::LlamaCpp(LlamaCppOptions {
            model: "/m.gguf".into(),
            ..Default::default()
        });
        let options = opts(backend, HashSet::new());
        let mut backend_config = BackendConfiguration::default();
        backend_config.docker.enabled = true;
        backend_config.docker.image = "ghcr.io/example/llama-server:latest".into();

        let spec = build_launch_spec(&options, &backend_config);
        assert_eq!(spec.command, "docker");
        assert!(spec.backend_args.contains(&"ghcr.io/example/llama-server:latest".to_string()));
        assert!(spec.backend_args.contains(&"--model".to_string()));
    }

    #[test]
    fn docker_disabled_for_mlx_lm_regardless_of_config() {
        let backend = BackendOptions::MlxLm(MlxLmOptions {
            model: "mlx-community/model".into(),
            ..Default::default()
        });
        let options = opts(backend, HashSet::new());
        let mut backend_config = BackendConfiguration::default();
        backend_config.docker.enabled = true;
        backend_config.docker.image = "ghcr.io/example/mlx:latest".into();

        let spec = build_launch_spec(&options, &backend_config);
        assert_eq!(spec.command, "mlx_lm.server");
    }
}
