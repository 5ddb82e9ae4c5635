//! Backend argv builders: the polymorphic capability set the core depends
//! on without knowing any backend's actual flag set.
//!
//! Each backend is a variant in [`BackendOptions`]; the shared operations
//! (`build_argv`, `build_docker_argv`, `validate`, `parse_command`, and the
//! host/port accessors) are the only surface the rest of the crate touches.

pub mod llama_cpp;
pub mod mlx_lm;
pub mod vllm;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SupervisorError;

pub use llama_cpp::LlamaCppOptions;
pub use mlx_lm::MlxLmOptions;
pub use vllm::VllmOptions;

/// Recognized backend-type tags. The core dispatches on this but never
/// enumerates the flags behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    LlamaCpp,
    MlxLm,
    Vllm,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendType::LlamaCpp => "llama_cpp",
            BackendType::MlxLm => "mlx_lm",
            BackendType::Vllm => "vllm",
        };
        write!(f, "{s}")
    }
}

/// Opaque-to-core, per-backend configuration record. Validated only by its
/// own `validate()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend_type", rename_all = "snake_case")]
pub enum BackendOptions {
    LlamaCpp(LlamaCppOptions),
    MlxLm(MlxLmOptions),
    Vllm(VllmOptions),
}

impl BackendOptions {
    pub fn backend_type(&self) -> BackendType {
        match self {
            BackendOptions::LlamaCpp(_) => BackendType::LlamaCpp,
            BackendOptions::MlxLm(_) => BackendType::MlxLm,
            BackendOptions::Vllm(_) => BackendType::Vllm,
        }
    }

    /// Native argv form, executable excluded — the caller (the process
    /// runner) prepends the configured command.
    pub fn build_argv(&self) -> Vec<String> {
        match self {
            BackendOptions::LlamaCpp(o) => o.build_argv(),
            BackendOptions::MlxLm(o) => o.build_argv(),
            BackendOptions::Vllm(o) => o.build_argv(),
        }
    }

    /// Containerized argv form. Empty for backends that do not support it
    /// (`mlx_lm` never supports docker execution regardless of config).
    pub fn build_docker_argv(&self) -> Vec<String> {
        match self {
            BackendOptions::LlamaCpp(o) => o.build_docker_argv(),
            BackendOptions::MlxLm(_) => Vec::new(),
            BackendOptions::Vllm(o) => o.build_docker_argv(),
        }
    }

    pub fn validate(&self) -> Result<(), SupervisorError> {
        match self {
            BackendOptions::LlamaCpp(o) => o.validate(),
            BackendOptions::MlxLm(o) => o.validate(),
            BackendOptions::Vllm(o) => o.validate(),
        }
    }

    pub fn get_host(&self) -> String {
        match self {
            BackendOptions::LlamaCpp(o) => o.host.clone(),
            BackendOptions::MlxLm(o) => o.host.clone(),
            BackendOptions::Vllm(o) => o.host.clone(),
        }
    }

    pub fn get_port(&self) -> u16 {
        match self {
            BackendOptions::LlamaCpp(o) => o.port,
            BackendOptions::MlxLm(o) => o.port,
            BackendOptions::Vllm(o) => o.port,
        }
    }

    pub fn set_port(&mut self, port: u16) {
        match self {
            BackendOptions::LlamaCpp(o) => o.port = port,
            BackendOptions::MlxLm(o) => o.port = port,
            BackendOptions::Vllm(o) => o.port = port,
        }
    }

    /// Parse a native CLI invocation string into a typed record for the
    /// given backend type. Accepts the executable as an optional leading
    /// token, backslash-continued lines, `=` or space value separators,
    /// and quoted values.
    pub fn parse_command(backend_type: BackendType, command: &str) -> Result<Self, SupervisorError> {
        let tokens = tokenize(command)?;
        let flags = group_flags(&tokens);
        Ok(match backend_type {
            BackendType::LlamaCpp => BackendOptions::LlamaCpp(LlamaCppOptions::from_flags(flags)),
            BackendType::MlxLm => BackendOptions::MlxLm(MlxLmOptions::from_flags(flags)),
            BackendType::Vllm => BackendOptions::Vllm(VllmOptions::from_flags(flags)),
        })
    }
}

/// Join backslash-continued lines, then split into argv tokens honoring
/// shell quoting. If the first token doesn't look like a flag, it is
/// treated as the executable path and dropped.
fn tokenize(command: &str) -> Result<Vec<String>, SupervisorError> {
    let joined = command.replace("\\\n", " ").replace('\n', " ");
    let mut tokens = shell_words::split(&joined)
        .map_err(|e| SupervisorError::Validation(format!("invalid command string: {e}")))?;

    if let Some(first) = tokens.first() {
        if !first.starts_with('-') {
            tokens.remove(0);
        }
    }
    Ok(tokens)
}

/// Group argv tokens into flag -> values. A flag with no following value
/// token is recorded as present with an empty value list (boolean flag).
/// `--flag=value` and `--flag value` are equivalent on input.
fn group_flags(tokens: &[String]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i].as_str();
        let Some(flag) = tok.strip_prefix("--").or_else(|| tok.strip_prefix('-')) else {
            i += 1;
            continue;
        };

        if let Some(eq_pos) = flag.find('=') {
            let name = &flag[..eq_pos];
            let value = &flag[eq_pos + 1..];
            map.entry(name.to_string()).or_default().push(value.to_string());
            i += 1;
            continue;
        }

        if i + 1 < tokens.len() && is_value_token(&tokens[i + 1]) {
            map.entry(flag.to_string()).or_default().push(tokens[i + 1].clone());
            i += 2;
        } else {
            map.entry(flag.to_string()).or_default();
            i += 1;
        }
    }
    map
}

/// A token beginning with `-` is a flag unless it parses as a float
/// (negative-number heuristic).
fn is_value_token(tok: &str) -> bool {
    if !tok.starts_with('-') {
        return true;
    }
    tok.parse::<f64>().is_ok()
}

/// snake_case identifier -> kebab-case CLI flag name.
pub(crate) fn kebab(field: &str) -> String {
    field.replace('_', "-")
}

/// kebab-case CLI flag name -> snake_case identifier.
pub(crate) fn snake(flag: &str) -> String {
    flag.replace('-', "_")
}

/// Emit `--flag` iff `value` is true.
pub(crate) fn push_bool(argv: &mut Vec<String>, field: &str, value: bool) {
    if value {
        argv.push(format!("--{}", kebab(field)));
    }
}

/// Emit `--flag value`, omitted if `value` is `None` or empty.
pub(crate) fn push_opt_string(argv: &mut Vec<String>, field: &str, value: &Option<String>) {
    if let Some(v) = value {
        if !v.is_empty() {
            argv.push(format!("--{}", kebab(field)));
            argv.push(v.clone());
        }
    }
}

/// Emit `--flag value`, omitted if `value` is `None` (zero values of
/// scalar fields are omitted per the argv construction rules).
pub(crate) fn push_opt_num<T: ToString + PartialEq + Default>(
    argv: &mut Vec<String>,
    field: &str,
    value: &Option<T>,
) {
    if let Some(v) = value {
        if *v != T::default() {
            argv.push(format!("--{}", kebab(field)));
            argv.push(v.to_string());
        }
    }
}

/// Emit a sequence field as repeated `--flag v1 --flag v2 ...`.
pub(crate) fn push_repeated(argv: &mut Vec<String>, field: &str, values: &[String]) {
    for v in values {
        argv.push(format!("--{}", kebab(field)));
        argv.push(v.clone());
    }
}

/// Append any flags the backend's typed record doesn't recognize, exactly
/// as received, so round-tripping through `parse_command`/`build_argv`
/// never silently drops unknown flags.
pub(crate) fn push_extra_args(argv: &mut Vec<String>, extra_args: &HashMap<String, Vec<String>>) {
    let mut keys: Vec<&String> = extra_args.keys().collect();
    keys.sort();
    for key in keys {
        let values = &extra_args[key];
        if values.is_empty() {
            argv.push(format!("--{key}"));
        } else {
            for v in values {
                argv.push(format!("--{key}"));
                argv.push(v.clone());
            }
        }
    }
}

pub(crate) fn take_string(flags: &mut HashMap<String, Vec<String>>, field: &str) -> Option<String> {
    flags.remove(&kebab(field)).and_then(|mut v| v.pop())
}

pub(crate) fn take_num<T: std::str::FromStr>(flags: &mut HashMap<String, Vec<String>>, field: &str) -> Option<T> {
    flags.remove(&kebab(field)).and_then(|mut v| v.pop()).and_then(|s| s.parse().ok())
}

pub(crate) fn take_bool(flags: &mut HashMap<String, Vec<String>>, field: &str) -> bool {
    flags.remove(&kebab(field)).is_some()
}

pub(crate) fn take_seq(flags: &mut HashMap<String, Vec<String>>, field: &str) -> Vec<String> {
    flags
        .remove(&kebab(field))
        .map(|values| values.into_iter().flat_map(|v| v.split(',').map(String::from).collect::<Vec<_>>()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_leading_executable() {
        let tokens = tokenize("llama-server --model /m --ctx-size 4096").unwrap();
        assert_eq!(tokens, vec!["--model", "/m", "--ctx-size", "4096"]);
    }

    #[test]
    fn tokenize_keeps_tokens_without_executable() {
        let tokens = tokenize("--model /m").unwrap();
        assert_eq!(tokens, vec!["--model", "/m"]);
    }

    #[test]
    fn group_flags_handles_eq_and_space_and_repeats() {
        let tokens = tokenize("--model /m --lora a.bin --lora=b.bin --verbose").unwrap();
        let flags = group_flags(&tokens);
        assert_eq!(flags.get("model").unwrap(), &vec!["/m".to_string()]);
        assert_eq!(
            flags.get("lora").unwrap(),
            &vec!["a.bin".to_string(), "b.bin".to_string()]
        );
        assert_eq!(flags.get("verbose").unwrap(), &Vec::<String>::new());
    }

    #[test]
    fn negative_number_heuristic_treats_negative_float_as_value() {
        let tokens = tokenize("--temperature -0.5 --top-p").unwrap();
        let flags = group_flags(&tokens);
        assert_eq!(flags.get("temperature").unwrap(), &vec!["-0.5".to_string()]);
        assert_eq!(flags.get("top-p").unwrap(), &Vec::<String>::new());
    }

    #[test]
    fn negative_looking_flag_is_not_consumed_as_value() {
        let tokens = tokenize("--gpu-layers --verbose").unwrap();
        let flags = group_flags(&tokens);
        assert_eq!(flags.get("gpu-layers").unwrap(), &Vec::<String>::new());
        assert!(flags.contains_key("verbose"));
    }
}
