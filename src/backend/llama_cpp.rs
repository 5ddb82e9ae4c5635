//! `llama.cpp`'s `llama-server` argv builder.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{push_bool, push_extra_args, push_opt_num, push_opt_string, push_repeated, take_bool, take_num, take_seq, take_string};
use crate::error::SupervisorError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlamaCppOptions {
    pub model: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub ctx_size: Option<u32>,
    #[serde(default)]
    pub gpu_layers: Option<u32>,
    #[serde(default)]
    pub threads: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub lora: Vec<String>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub extra_args: HashMap<String, Vec<String>>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for LlamaCppOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            host: default_host(),
            port: 0,
            ctx_size: None,
            gpu_layers: None,
            threads: None,
            batch_size: None,
            lora: Vec::new(),
            verbose: false,
            extra_args: HashMap::new(),
        }
    }
}

impl LlamaCppOptions {
    pub fn build_argv(&self) -> Vec<String> {
        let mut argv = Vec::new();
        push_opt_string(&mut argv, "model", &Some(self.model.clone()));
        push_opt_string(&mut argv, "host", &Some(self.host.clone()));
        push_opt_num(&mut argv, "port", &Some(self.port));
        push_opt_num(&mut argv, "ctx-size", &self.ctx_size);
        push_opt_num(&mut argv, "gpu-layers", &self.gpu_layers);
        push_opt_num(&mut argv, "threads", &self.threads);
        push_opt_num(&mut argv, "batch-size", &self.batch_size);
        push_repeated(&mut argv, "lora", &self.lora);
        push_bool(&mut argv, "verbose", self.verbose);
        push_extra_args(&mut argv, &self.extra_args);
        argv
    }

    pub fn build_docker_argv(&self) -> Vec<String> {
        // Same flag surface; the docker image wraps the same binary.
        self.build_argv()
    }

    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.model.trim().is_empty() {
            return Err(SupervisorError::Validation("llama_cpp: model path is required".into()));
        }
        validate_no_shell_metacharacters("model", &self.model)?;
        for v in &self.lora {
            validate_no_shell_metacharacters("lora", v)?;
        }
        Ok(())
    }

    pub(crate) fn from_flags(mut flags: HashMap<String, Vec<String>>) -> Self {
        Self {
            model: take_string(&mut flags, "model").unwrap_or_default(),
            host: take_string(&mut flags, "host").unwrap_or_else(default_host),
            port: take_num(&mut flags, "port").unwrap_or(0),
            ctx_size: take_num(&mut flags, "ctx_size"),
            gpu_layers: take_num(&mut flags, "gpu_layers"),
            threads: take_num(&mut flags, "threads"),
            batch_size: take_num(&mut flags, "batch_size"),
            lora: take_seq(&mut flags, "lora"),
            verbose: take_bool(&mut flags, "verbose"),
            extra_args: flags,
        }
    }
}

pub(super) fn validate_no_shell_metacharacters(field: &str, value: &str) -> Result<(), SupervisorError> {
    const BAD: &[char] = &[';', '|', '&', '`', '$', '\n'];
    if value.contains(BAD) {
        return Err(SupervisorError::Validation(format!(
            "{field}: value contains disallowed shell metacharacters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_parse_and_build() {
        let opts = LlamaCppOptions {
            model: "/m.gguf".into(),
            host: "127.0.0.1".into(),
            port: 8001,
            ctx_size: Some(4096),
            lora: vec!["a.bin".into(), "b.bin".into()],
            ..Default::default()
        };
        let argv = opts.build_argv();
        assert!(argv.contains(&"--model".to_string()));
        assert!(argv.contains(&"--ctx-size".to_string()));
        assert!(argv.iter().filter(|t| *t == "--lora").count() == 2);
    }

    #[test]
    fn rejects_shell_metacharacters() {
        let opts = LlamaCppOptions {
            model: "/m.gguf; rm -rf /".into(),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_empty_model() {
        let opts = LlamaCppOptions::default();
        assert!(opts.validate().is_err());
    }
}
