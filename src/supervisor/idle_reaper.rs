//! Idle reaper: a periodic task that stops instances whose proxy
//! reports the idle timeout exceeded. A tick in flight is not cancelled
//! when configuration reloads — it completes and the next tick honors the
//! new interval.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::registry::Registry;

/// Spawns the periodic sweep task. `interval_minutes` of `0` still ticks
/// (clamped to at least one minute) rather than busy-looping.
pub fn spawn(registry: Arc<Registry>, interval_minutes: u32, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(interval_minutes.max(1) as u64 * 60);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("idle reaper stopping");
                    return;
                }
                _ = ticker.tick() => {
                    sweep(&registry).await;
                }
            }
        }
    })
}

async fn sweep(registry: &Registry) {
    for instance in registry.list() {
        if instance.is_remote() {
            continue;
        }
        if instance.should_timeout() && instance.inflight_count() == 0 {
            tracing::info!(instance = instance.name(), "idle timeout exceeded, stopping");
            if let Err(e) = instance.stop().await {
                tracing::warn!(instance = instance.name(), error = %e, "idle reaper stop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOptions, LlamaCppOptions};
    use crate::config::{BackendsConfiguration, LogRotationConfiguration};
    use crate::instance::options::Options;
    use crate::persistence::PersistenceStore;
    use std::collections::{HashMap, HashSet};

    #[tokio::test]
    async fn sweep_skips_remote_and_non_idle_instances() {
        let persistence = Arc::new(PersistenceStore::open_in_memory().unwrap());
        let registry = Registry::new(persistence);
        let dir = tempfile::tempdir().unwrap();

        let local = crate::instance::Instance::new(
            "local".into(),
            Options {
                auto_restart: None,
                max_restarts: 0,
                restart_delay_seconds: 0,
                on_demand_start: false,
                idle_timeout_minutes: 0,
                environment: HashMap::new(),
                nodes: HashSet::new(),
                backend: BackendOptions::LlamaCpp(LlamaCppOptions {
                    model: "/m.gguf".into(),
                    ..Default::default()
                }),
            },
            BackendsConfiguration::default(),
            dir.path(),
            LogRotationConfiguration::default(),
            "local-node".into(),
        )
        .unwrap();
        registry.insert("local".into(), local, None, 0);

        // idle_timeout_minutes == 0 disables the check; sweep must not panic
        // or attempt to stop a never-started instance.
        sweep(&registry).await;
    }
}
