//! `vllm serve`'s argv builder.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{push_bool, push_extra_args, push_opt_num, push_opt_string, take_bool, take_num, take_string};
use crate::backend::llama_cpp::validate_no_shell_metacharacters;
use crate::error::SupervisorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VllmOptions {
    pub model: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub tensor_parallel_size: Option<u32>,
    #[serde(default)]
    pub gpu_memory_utilization: Option<f32>,
    #[serde(default)]
    pub max_model_len: Option<u32>,
    #[serde(default)]
    pub enforce_eager: bool,
    #[serde(default)]
    pub extra_args: HashMap<String, Vec<String>>,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

impl Default for VllmOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            host: default_host(),
            port: 0,
            tensor_parallel_size: None,
            gpu_memory_utilization: None,
            max_model_len: None,
            enforce_eager: false,
            extra_args: HashMap::new(),
        }
    }
}

impl VllmOptions {
    pub fn build_argv(&self) -> Vec<String> {
        let mut argv = Vec::new();
        push_opt_string(&mut argv, "model", &Some(self.model.clone()));
        push_opt_string(&mut argv, "host", &Some(self.host.clone()));
        push_opt_num(&mut argv, "port", &Some(self.port));
        push_opt_num(&mut argv, "tensor-parallel-size", &self.tensor_parallel_size);
        push_opt_num(&mut argv, "gpu-memory-utilization", &self.gpu_memory_utilization);
        push_opt_num(&mut argv, "max-model-len", &self.max_model_len);
        push_bool(&mut argv, "enforce-eager", self.enforce_eager);
        push_extra_args(&mut argv, &self.extra_args);
        argv
    }

    pub fn build_docker_argv(&self) -> Vec<String> {
        self.build_argv()
    }

    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.model.trim().is_empty() {
            return Err(SupervisorError::Validation("vllm: model is required".into()));
        }
        validate_no_shell_metacharacters("model", &self.model)?;
        Ok(())
    }

    pub(crate) fn from_flags(mut flags: HashMap<String, Vec<String>>) -> Self {
        Self {
            model: take_string(&mut flags, "model").unwrap_or_default(),
            host: take_string(&mut flags, "host").unwrap_or_else(default_host),
            port: take_num(&mut flags, "port").unwrap_or(0),
            tensor_parallel_size: take_num(&mut flags, "tensor_parallel_size"),
            gpu_memory_utilization: take_num(&mut flags, "gpu_memory_utilization"),
            max_model_len: take_num(&mut flags, "max_model_len"),
            enforce_eager: take_bool(&mut flags, "enforce_eager"),
            extra_args: flags,
        }
    }
}
