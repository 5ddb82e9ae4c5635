//! Supervisor façade: the public operations (`Create`, `Get`, `Update`,
//! `Delete`, `Start`, `Stop`, `Restart`, `List`, `Proxy`, `Logs`) composed
//! from the registry, running-set controller, idle reaper and remote
//! dispatcher.

pub mod idle_reaper;
pub mod remote;
pub mod running_set;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{Request, Response};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::Configuration;
use crate::error::SupervisorError;
use crate::instance::options::Options;
use crate::instance::status::Status;
use crate::instance::Instance;
use crate::persistence::PersistenceStore;
use crate::port_allocator::PortAllocator;
use crate::registry::Registry;
use remote::RemoteDispatcher;
use running_set::RunningSetController;

/// A point-in-time view of an instance, returned by `Get`/`List`/`Create`.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub name: String,
    pub status: Status,
    pub created_at: i64,
    pub owner: Option<String>,
    pub options: Options,
}

pub struct Supervisor {
    config: Arc<Configuration>,
    registry: Arc<Registry>,
    port_allocator: Arc<PortAllocator>,
    running_set: Arc<RunningSetController>,
    remote: Arc<RemoteDispatcher>,
    idle_reaper_cancel: CancellationToken,
}

impl Supervisor {
    pub async fn new(config: Arc<Configuration>, persistence: Arc<PersistenceStore>) -> anyhow::Result<Arc<Self>> {
        let registry = Arc::new(Registry::new(persistence.clone()));
        let port_allocator = Arc::new(PortAllocator::new(
            config.instances.port_range_low,
            config.instances.port_range_high,
        ));
        let running_set = Arc::new(RunningSetController::new(
            config.instances.max_running_instances,
            config.instances.enable_lru_eviction,
        ));
        let remote = Arc::new(RemoteDispatcher::new(config.nodes.nodes.clone()));

        let supervisor = Arc::new(Self {
            config,
            registry,
            port_allocator,
            running_set,
            remote,
            idle_reaper_cancel: CancellationToken::new(),
        });

        supervisor.rehydrate(&persistence).await?;
        Ok(supervisor)
    }

    /// Load persisted records and reconstruct their `Instance`s. Daemon
    /// restarts leave no subprocess alive, so every rehydrated instance
    /// starts `stopped` regardless of what status was last persisted
    /// (`Instance::new` always initializes the status cell to `stopped`) —
    /// the operator or an on-demand request restarts it. This is the
    /// conservative reading of an open design question, recorded in
    /// DESIGN.md.
    async fn rehydrate(&self, persistence: &PersistenceStore) -> anyhow::Result<()> {
        let records = persistence.load_all().await?;
        for record in records {
            let is_remote = record.options.is_remote(&self.config.nodes.local_node_id);
            if !is_remote {
                let port = record.options.get_port();
                if port != 0 {
                    self.port_allocator.reserve(port);
                }
            }

            let instance = Instance::new(
                record.name.clone(),
                record.options,
                self.config.backends.clone(),
                &self.config.system.logs_directory,
                self.config.log_rotation.clone(),
                self.config.nodes.local_node_id.clone(),
            )?;

            self.wire_instance_callbacks(instance.clone());
            self.registry.insert(record.name.clone(), instance, record.owner, record.created_at);
            tracing::info!(instance = %record.name, persisted_status = %record.status, "rehydrated instance as stopped");
        }
        Ok(())
    }

    /// Registers the status-change callback (fired outside the status
    /// lock) that keeps the running-set and persisted record in sync with
    /// every transition.
    fn wire_instance_callbacks(&self, instance: Arc<Instance>) {
        let registry = self.registry.clone();
        let running_set = self.running_set.clone();
        let name = instance.name().to_string();
        let instance_for_set = instance.clone();

        instance.on_status_change(move |old, new| {
            if new.is_running() {
                running_set.mark_running(&name, instance_for_set.clone() as Arc<dyn running_set::Runnable>);
            } else if old.is_running() {
                running_set.mark_stopped(&name);
            }

            let registry = registry.clone();
            let name = name.clone();
            tokio::spawn(async move {
                if let Err(e) = registry.persist(&name).await {
                    tracing::error!(instance = %name, error = %e, "failed to persist status transition");
                }
            });
        });
    }

    pub fn local_node_id(&self) -> &str {
        &self.config.nodes.local_node_id
    }

    /// Spawns the idle reaper at the configured interval. Call once at
    /// startup; the returned handle can be awaited on shutdown.
    pub fn spawn_idle_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        idle_reaper::spawn(
            self.registry.clone(),
            self.config.instances.timeout_check_interval_minutes,
            self.idle_reaper_cancel.clone(),
        )
    }

    /// Periodic low-frequency sweep that re-persists every instance,
    /// repairing drift between in-memory status and the last-persisted
    /// record with eventual consistency rather than an immediate retry,
    /// since the status-change callback already tries once.
    pub fn spawn_persistence_reconciler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self.registry.clone();
        let cancel = self.idle_reaper_cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("persistence reconciler stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        for instance in registry.list() {
                            if let Err(e) = registry.persist(instance.name()).await {
                                tracing::warn!(instance = instance.name(), error = %e, "periodic persistence reconciliation failed");
                            }
                        }
                    }
                }
            }
        })
    }

    /// Stop every locally-running instance, bounded by the same graceful
    /// windows as a single `stop()`. Called from the signal handler before
    /// the HTTP listener closes.
    pub async fn shutdown(&self) {
        self.idle_reaper_cancel.cancel();

        let mut handles = Vec::new();
        for instance in self.registry.list() {
            if instance.is_remote() || !instance.status().is_running() {
                continue;
            }
            handles.push(tokio::spawn(async move {
                if let Err(e) = instance.stop().await {
                    tracing::warn!(instance = instance.name(), error = %e, "shutdown stop failed");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub async fn create(&self, name: String, mut options: Options, owner: Option<String>) -> Result<InstanceSnapshot, SupervisorError> {
        validate_name(&name)?;
        options.validate_and_default(&self.config.instances)?;

        let _guard = self.registry.lock(&name).await;
        if self.registry.contains(&name) {
            return Err(SupervisorError::NameInUse(name));
        }

        let max_instances = self.config.instances.max_instances;
        if max_instances >= 0 && self.registry.count() as i64 >= max_instances {
            return Err(SupervisorError::Validation(format!(
                "maximum instance count ({max_instances}) reached"
            )));
        }

        let is_remote = options.is_remote(&self.config.nodes.local_node_id);
        let mut reserved_port = None;
        if !is_remote && options.get_port() == 0 {
            let port = self.port_allocator.allocate()?;
            options.set_port(port);
            reserved_port = Some(port);
        }

        let port_allocator = self.port_allocator.clone();
        let guard = scopeguard::guard(reserved_port, move |p| {
            if let Some(p) = p {
                port_allocator.release(p);
            }
        });

        let instance = Instance::new(
            name.clone(),
            options,
            self.config.backends.clone(),
            &self.config.system.logs_directory,
            self.config.log_rotation.clone(),
            self.config.nodes.local_node_id.clone(),
        )?;

        self.wire_instance_callbacks(instance.clone());
        let created_at = now_unix();
        self.registry.insert(name.clone(), instance.clone(), owner.clone(), created_at);
        // The registry now owns the port reservation; defuse without releasing it.
        let _ = scopeguard::ScopeGuard::into_inner(guard);

        if let Err(e) = self.registry.persist(&name).await {
            tracing::error!(instance = %name, error = %e, "failed to persist new instance");
        }

        Ok(InstanceSnapshot {
            name,
            status: instance.status(),
            created_at,
            owner,
            options: instance.get_options(),
        })
    }

    pub fn get(&self, name: &str) -> Result<InstanceSnapshot, SupervisorError> {
        let instance = self.registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        let (created_at, owner) = self.registry.meta(name).unwrap_or((0, None));
        Ok(InstanceSnapshot {
            name: name.to_string(),
            status: instance.status(),
            created_at,
            owner,
            options: instance.get_options(),
        })
    }

    pub fn list(&self) -> Vec<InstanceSnapshot> {
        self.registry
            .list()
            .into_iter()
            .map(|instance| {
                let name = instance.name().to_string();
                let (created_at, owner) = self.registry.meta(&name).unwrap_or((0, None));
                InstanceSnapshot {
                    status: instance.status(),
                    created_at,
                    owner,
                    options: instance.get_options(),
                    name,
                }
            })
            .collect()
    }

    pub async fn update(&self, name: &str, options: Options) -> Result<InstanceSnapshot, SupervisorError> {
        let _guard = self.registry.lock(name).await;
        let instance = self.registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        instance.set_options(options, &self.config.instances)?;
        if let Err(e) = self.registry.persist(name).await {
            tracing::error!(instance = name, error = %e, "failed to persist updated options");
        }
        self.get(name)
    }

    pub async fn delete(&self, name: &str) -> Result<(), SupervisorError> {
        let _guard = self.registry.lock(name).await;
        let instance = self.registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;

        let status = instance.status();
        if !matches!(status, Status::Stopped | Status::Failed) {
            return Err(SupervisorError::Busy(name.to_string(), "instance must be stopped or failed".into()));
        }
        if instance.inflight_count() > 0 {
            return Err(SupervisorError::Busy(name.to_string(), "instance has inflight requests".into()));
        }

        let is_remote = instance.is_remote();
        let port = instance.get_options().get_port();

        self.running_set.mark_stopped(name);
        self.registry.remove(name);
        if !is_remote {
            self.port_allocator.release(port);
        }
        self.registry.forget(name).await?;
        Ok(())
    }

    pub async fn start(&self, name: &str) -> Result<(), SupervisorError> {
        let _guard = self.registry.lock(name).await;
        let instance = self.registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;

        if instance.is_remote() {
            let options = instance.get_options();
            let node = self.remote.target_node(options.nodes.iter())?;
            return self.remote.start(node, name).await;
        }

        if instance.status().is_running() {
            return Err(SupervisorError::AlreadyRunning(name.to_string()));
        }

        self.running_set.admit(name).await?;
        if let Err(e) = instance.start().await {
            self.running_set.cancel_reservation(name);
            return Err(e);
        }
        if let Err(e) = self.registry.persist(name).await {
            tracing::error!(instance = name, error = %e, "failed to persist start transition");
        }
        Ok(())
    }

    pub async fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        let _guard = self.registry.lock(name).await;
        let instance = self.registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;

        if instance.is_remote() {
            let options = instance.get_options();
            let node = self.remote.target_node(options.nodes.iter())?;
            return self.remote.stop(node, name).await;
        }

        instance.stop().await?;
        if let Err(e) = self.registry.persist(name).await {
            tracing::error!(instance = name, error = %e, "failed to persist stop transition");
        }
        Ok(())
    }

    pub async fn restart(&self, name: &str) -> Result<(), SupervisorError> {
        let _guard = self.registry.lock(name).await;
        let instance = self.registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;

        if instance.is_remote() {
            let options = instance.get_options();
            let node = self.remote.target_node(options.nodes.iter())?;
            return self.remote.restart(node, name).await;
        }

        self.running_set.admit(name).await?;
        if let Err(e) = instance.restart().await {
            self.running_set.cancel_reservation(name);
            return Err(e);
        }
        if let Err(e) = self.registry.persist(name).await {
            tracing::error!(instance = name, error = %e, "failed to persist restart transition");
        }
        Ok(())
    }

    pub fn logs(&self, name: &str, n: i64) -> Result<Vec<String>, SupervisorError> {
        let instance = self.registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        if instance.is_remote() {
            return Err(SupervisorError::RemoteNotSupported);
        }
        instance.get_logs(n)
    }

    /// `Proxy(name, req)`: on-demand start if configured, then dispatch
    /// through the reverse proxy, or forward to the remote dispatcher.
    /// Does not hold the per-name mutex except during the on-demand start
    /// path.
    pub async fn proxy(&self, name: &str, request: Request<Body>) -> Result<Response<Body>, SupervisorError> {
        let instance = self.registry.get(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;

        if instance.is_remote() {
            let options = instance.get_options();
            let node = self.remote.target_node(options.nodes.iter())?;
            return self.remote.proxy(node, name, request).await;
        }

        if instance.status() == Status::ShuttingDown {
            return Err(SupervisorError::ShuttingDown(name.to_string()));
        }

        if !instance.status().is_running() {
            if !instance.get_options().on_demand_start {
                return Err(SupervisorError::NotRunning(name.to_string()));
            }
            self.on_demand_start(name, &instance).await?;
        }

        let target = instance.local_target();
        instance.serve(target, request).await
    }

    /// Coalesces concurrent on-demand starts for the same name onto the
    /// per-name mutex; only the first caller through performs the start.
    async fn on_demand_start(&self, name: &str, instance: &Arc<Instance>) -> Result<(), SupervisorError> {
        let _guard = self.registry.lock(name).await;
        if instance.status().is_running() {
            return Ok(());
        }

        self.running_set.admit(name).await?;
        if let Err(e) = instance.start().await {
            self.running_set.cancel_reservation(name);
            return Err(e);
        }
        if let Err(e) = self.registry.persist(name).await {
            tracing::error!(instance = name, error = %e, "failed to persist on-demand start");
        }

        let timeout_s = self.config.instances.on_demand_start_timeout_seconds as u64;
        instance
            .wait_healthy(Some(timeout_s))
            .await
            .map_err(|_| SupervisorError::OnDemandTimeout(name.to_string()))
    }
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Printable, length-bounded, no shell/path metacharacters.
fn validate_name(name: &str) -> Result<(), SupervisorError> {
    const MAX_LEN: usize = 64;
    if name.is_empty() || name.len() > MAX_LEN {
        return Err(SupervisorError::Validation(format!(
            "instance name must be 1-{MAX_LEN} characters"
        )));
    }
    let valid = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(SupervisorError::Validation(
            "instance name may only contain letters, digits, '-' and '_'".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_rejects_shell_metacharacters() {
        assert!(validate_name("alpha").is_ok());
        assert!(validate_name("alpha-1_beta").is_ok());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("rm -rf").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(65)).is_err());
    }
}
