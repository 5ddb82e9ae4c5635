//! Options cell: thread-safe holder for an instance's typed
//! configuration, copy-on-read.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backend::{BackendOptions, BackendType};
use crate::config::InstancesConfiguration;
use crate::error::SupervisorError;

/// Tri-state boolean: unset inherits the global default.
pub type TriBool = Option<bool>;

/// Per-instance configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    #[serde(default)]
    pub auto_restart: TriBool,
    #[serde(default)]
    pub max_restarts: u32,
    #[serde(default)]
    pub restart_delay_seconds: u32,
    #[serde(default)]
    pub on_demand_start: bool,
    #[serde(default)]
    pub idle_timeout_minutes: u32,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub nodes: HashSet<String>,
    pub backend: BackendOptions,
}

impl Options {
    pub fn backend_type(&self) -> BackendType {
        self.backend.backend_type()
    }

    pub fn get_host(&self) -> String {
        self.backend.get_host()
    }

    pub fn get_port(&self) -> u16 {
        self.backend.get_port()
    }

    pub fn set_port(&mut self, port: u16) {
        self.backend.set_port(port);
    }

    /// `true` iff `nodes` is non-empty and does not contain the local node.
    pub fn is_remote(&self, local_node_id: &str) -> bool {
        !self.nodes.is_empty() && !self.nodes.contains(local_node_id)
    }

    /// Validate the record, applying defaults from the global config for
    /// fields the caller left at the record's own zero value where that
    /// would otherwise be ambiguous.
    pub fn validate_and_default(&mut self, defaults: &InstancesConfiguration) -> Result<(), SupervisorError> {
        for key in self.environment.keys() {
            validate_env_key(key)?;
        }

        if self.auto_restart.is_none() {
            self.auto_restart = Some(defaults.default_auto_restart);
        }
        if self.max_restarts == 0 && self.auto_restart == Some(true) {
            self.max_restarts = defaults.default_max_restarts;
        }
        if self.restart_delay_seconds == 0 {
            self.restart_delay_seconds = defaults.default_restart_delay_seconds;
        }

        self.backend.validate()?;

        Ok(())
    }
}

fn validate_env_key(key: &str) -> Result<(), SupervisorError> {
    let valid = !key.is_empty()
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !key.chars().next().unwrap().is_ascii_digit();
    if !valid {
        return Err(SupervisorError::Validation(format!(
            "environment key '{key}' is not a valid identifier"
        )));
    }
    Ok(())
}

/// Holds the current [`Options`] behind a reader/writer lock. `get()`
/// returns a clone (the copy-on-read contract); `set()` replaces the value
/// atomically after the caller has validated it.
pub struct OptionsCell {
    inner: RwLock<Options>,
}

impl OptionsCell {
    pub fn new(options: Options) -> Self {
        Self {
            inner: RwLock::new(options),
        }
    }

    pub fn get(&self) -> Options {
        self.inner.read().clone()
    }

    /// Replace the options, preserving the previous value's `nodes` field —
    /// instances cannot relocate between nodes via update.
    pub fn set(&self, mut new: Options) {
        let mut guard = self.inner.write();
        new.nodes = guard.nodes.clone();
        *guard = new;
    }

    pub fn get_host(&self) -> String {
        self.inner.read().get_host()
    }

    pub fn get_port(&self) -> u16 {
        self.inner.read().get_port()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LlamaCppOptions;

    fn sample_options() -> Options {
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
        }
    }

    #[test]
    fn set_preserves_prior_nodes_field() {
        let cell = OptionsCell::new(sample_options());
        {
            let mut guard = cell.inner.write();
            guard.nodes.insert("node-a".into());
        }

        let mut updated = sample_options();
        updated.nodes.insert("node-b".into());
        cell.set(updated);

        assert_eq!(cell.get().nodes, HashSet::from(["node-a".to_string()]));
    }

    #[test]
    fn is_remote_detection() {
        let mut opts = sample_options();
        assert!(!opts.is_remote("local"));

        opts.nodes.insert("peer-1".into());
        assert!(opts.is_remote("local"));

        opts.nodes.insert("local".into());
        assert!(!opts.is_remote("local"));
    }

    #[test]
    fn rejects_invalid_environment_keys() {
        let mut opts = sample_options();
        opts.environment.insert("1BAD".into(), "x".into());
        let defaults = InstancesConfiguration::default();
        assert!(opts.validate_and_default(&defaults).is_err());
    }
}
