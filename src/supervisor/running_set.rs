//! Running-set controller: tracks which instances are currently
//! running (or mid-restart), enforces the `max_running` cap via LRU
//! eviction, and gates on-demand starts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::SupervisorError;

/// The slice of [`crate::instance::Instance`] the running-set needs.
/// Kept as a trait (rather than depending on `Instance` directly) so the
/// eviction algorithm can be exercised against a lightweight fake in
/// tests, without spawning real subprocesses.
#[async_trait]
pub trait Runnable: Send + Sync {
    fn name(&self) -> &str;
    fn inflight_count(&self) -> u32;
    fn last_active_ts(&self) -> i64;
    async fn stop(&self) -> Result<(), SupervisorError>;
}

#[async_trait]
impl Runnable for crate::instance::Instance {
    fn name(&self) -> &str {
        crate::instance::Instance::name(self)
    }

    fn inflight_count(&self) -> u32 {
        crate::instance::Instance::inflight_count(self)
    }

    fn last_active_ts(&self) -> i64 {
        crate::instance::Instance::last_active_ts(self)
    }

    async fn stop(&self) -> Result<(), SupervisorError> {
        crate::instance::Instance::stop(self).await
    }
}

/// An occupied slot in the running set: either a real running instance, or
/// a placeholder reserved by `admit` for a candidate whose `start()` hasn't
/// reached a status-change callback yet. Counting reservations toward
/// capacity is what lets `admit` be a single atomic check-and-reserve
/// instead of a check that a second, concurrent `admit` for a different
/// name could slip past before either candidate actually starts.
enum Slot {
    Reserved,
    Running(Arc<dyn Runnable>),
}

/// Holds the set of names currently `running`/`restarting` (plus any
/// in-flight reservations). Parameterized by `max_running` (`-1` =
/// unlimited) and whether LRU eviction is enabled when the cap is reached.
pub struct RunningSetController {
    entries: Mutex<HashMap<String, Slot>>,
    max_running: i64,
    lru_eviction_enabled: bool,
}

impl RunningSetController {
    pub fn new(max_running: i64, lru_eviction_enabled: bool) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_running,
            lru_eviction_enabled,
        }
    }

    pub fn running_count(&self) -> usize {
        self.entries.lock().values().filter(|s| matches!(s, Slot::Running(_))).count()
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    /// Record that `name` transitioned into `running`/`restarting`,
    /// replacing any reservation `admit` made for it.
    pub fn mark_running(&self, name: &str, instance: Arc<dyn Runnable>) {
        self.entries.lock().insert(name.to_string(), Slot::Running(instance));
    }

    /// Record that `name` left `running`/`restarting`.
    pub fn mark_stopped(&self, name: &str) {
        self.entries.lock().remove(name);
    }

    /// Releases a reservation `admit` made for `name` when the caller's own
    /// start attempt never reached a real transition (e.g. a `Spawn`
    /// failure) — otherwise the placeholder would hold the slot forever.
    /// A no-op if `name` has since become a real running entry.
    pub fn cancel_reservation(&self, name: &str) {
        let mut entries = self.entries.lock();
        if matches!(entries.get(name), Some(Slot::Reserved)) {
            entries.remove(name);
        }
    }

    /// Called before starting `candidate` (not yet tracked). Checks
    /// occupancy and reserves `candidate`'s slot under the same lock
    /// acquisition, so two concurrent `admit` calls for different names can
    /// never both observe free capacity and both proceed. If the running
    /// count is at or above `max_running`, either evicts the
    /// least-recently-active idle entry (if LRU eviction is enabled) or
    /// fails `CapacityExhausted`.
    pub async fn admit(&self, candidate: &str) -> Result<(), SupervisorError> {
        if self.max_running < 0 {
            return Ok(());
        }
        let max_running = self.max_running as usize;

        loop {
            {
                let mut entries = self.entries.lock();
                let already_counted = entries.contains_key(candidate);
                if entries.len() < max_running || already_counted {
                    entries.entry(candidate.to_string()).or_insert(Slot::Reserved);
                    return Ok(());
                }
            }

            if !self.lru_eviction_enabled {
                return Err(SupervisorError::CapacityExhausted);
            }

            let victim = self.pick_eviction_victim(candidate);
            let Some(victim) = victim else {
                return Err(SupervisorError::CapacityExhausted);
            };

            let name = victim.name().to_string();
            if let Err(e) = victim.stop().await {
                tracing::warn!(instance = %name, error = %e, "LRU eviction stop failed");
                return Err(SupervisorError::CapacityExhausted);
            }
            // The instance's own status-change callback removes it from
            // this set; do so here too in case the callback hasn't fired
            // yet, so the next loop iteration sees reduced occupancy.
            self.mark_stopped(&name);
        }
    }

    /// Smallest `last_active_ts` among running (not reserved) entries with
    /// `inflight == 0`, excluding `candidate` itself.
    fn pick_eviction_victim(&self, candidate: &str) -> Option<Arc<dyn Runnable>> {
        let entries = self.entries.lock();
        entries
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Running(instance) if key != candidate && instance.inflight_count() == 0 => Some(instance.clone()),
                _ => None,
            })
            .min_by_key(|i| i.last_active_ts())
    }
}
