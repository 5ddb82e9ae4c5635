//! `mlx_lm.server`'s argv builder. Apple Silicon only — never supports
//! containerized execution, regardless of configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{push_bool, push_extra_args, push_opt_num, push_opt_string, take_bool, take_num, take_string};
use crate::backend::llama_cpp::validate_no_shell_metacharacters;
use crate::error::SupervisorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlxLmOptions {
    pub model: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temp: Option<f32>,
    #[serde(default)]
    pub trust_remote_code: bool,
    #[serde(default)]
    pub extra_args: HashMap<String, Vec<String>>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for MlxLmOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            host: default_host(),
            port: 0,
            max_tokens: None,
            temp: None,
            trust_remote_code: false,
            extra_args: HashMap::new(),
        }
    }
}

impl MlxLmOptions {
    pub fn build_argv(&self) -> Vec<String> {
        let mut argv = Vec::new();
        push_opt_string(&mut argv, "model", &Some(self.model.clone()));
        push_opt_string(&mut argv, "host", &Some(self.host.clone()));
        push_opt_num(&mut argv, "port", &Some(self.port));
        push_opt_num(&mut argv, "max-tokens", &self.max_tokens);
        push_opt_num(&mut argv, "temp", &self.temp);
        push_bool(&mut argv, "trust-remote-code", self.trust_remote_code);
        push_extra_args(&mut argv, &self.extra_args);
        argv
    }

    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.model.trim().is_empty() {
            return Err(SupervisorError::Validation("mlx_lm: model is required".into()));
        }
        validate_no_shell_metacharacters("model", &self.model)?;
        Ok(())
    }

    pub(crate) fn from_flags(mut flags: HashMap<String, Vec<String>>) -> Self {
        Self {
            model: take_string(&mut flags, "model").unwrap_or_default(),
            host: take_string(&mut flags, "host").unwrap_or_else(default_host),
            port: take_num(&mut flags, "port").unwrap_or(0),
            max_tokens: take_num(&mut flags, "max_tokens"),
            temp: take_num(&mut flags, "temp"),
            trust_remote_code: take_bool(&mut flags, "trust_remote_code"),
            extra_args: flags,
        }
    }
}
