//! Status cell: a thread-safe lifecycle enum with a change callback.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Lifecycle states of an instance. See the transition table owned by
/// [`crate::instance::Instance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Stopped,
    Running,
    Restarting,
    Failed,
    ShuttingDown,
}

impl Status {
    pub fn is_running(&self) -> bool {
        matches!(self, Status::Running | Status::Restarting)
    }

    /// Parse the wire form; unknown names fall back to `stopped` with a
    /// log line rather than failing deserialization outright.
    pub fn from_wire(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "running" => Status::Running,
            "restarting" => Status::Restarting,
            "failed" => Status::Failed,
            "shutting_down" => Status::ShuttingDown,
            "stopped" => Status::Stopped,
            other => {
                tracing::warn!(status = other, "unknown status on the wire, defaulting to stopped");
                Status::Stopped
            }
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Stopped => "stopped",
            Status::Running => "running",
            Status::Restarting => "restarting",
            Status::Failed => "failed",
            Status::ShuttingDown => "shutting_down",
        };
        write!(f, "{s}")
    }
}

type ChangeCallback = dyn Fn(Status, Status) + Send + Sync;

/// Guards a [`Status`] behind a reader/writer lock and invokes a single
/// registered callback, outside the lock, whenever the value actually
/// changes. Firing outside the lock avoids re-entrancy deadlocks when the
/// callback needs to read other instance state (e.g. the running-set
/// controller reading inflight counts).
pub struct StatusCell {
    value: RwLock<Status>,
    callback: RwLock<Option<Arc<ChangeCallback>>>,
}

impl StatusCell {
    pub fn new(initial: Status) -> Self {
        Self {
            value: RwLock::new(initial),
            callback: RwLock::new(None),
        }
    }

    pub fn get(&self) -> Status {
        *self.value.read()
    }

    pub fn is_running(&self) -> bool {
        self.value.read().is_running()
    }

    /// Register the single change callback. Replaces any previous one.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(Status, Status) + Send + Sync + 'static,
    {
        *self.callback.write() = Some(Arc::new(callback));
    }

    /// Set the new status. If it differs from the old value, snapshots the
    /// callback under the lock then invokes it after releasing the lock.
    pub fn set(&self, new: Status) {
        let old = {
            let mut guard = self.value.write();
            let old = *guard;
            *guard = new;
            old
        };

        if old != new {
            let callback = self.callback.read().clone();
            if let Some(callback) = callback {
                callback(old, new);
            }
        }
    }
}
