//! Interactive configuration scaffold - prompts for the handful of values
//! an operator actually needs to change before first boot and writes a
//! ready-to-edit `config.yml`.

use std::io::Write;

use anyhow::Result;

pub async fn run(config_path: &str) -> Result<()> {
    println!("llamactld configuration setup");
    println!("==============================\n");

    let host = prompt("Bind host", "0.0.0.0")?;
    let port = prompt("Bind port", "8080")?;
    let data_dir = prompt("Data directory", "data")?;
    let node_id = prompt("Local node identifier", "local")?;

    let contents = format!(
        r#"# llamactld configuration
# Every key here has an LLAMACTLD_* environment-variable override; see
# the "Configuration (recognized options)" list for the full set.

server:
  host: "{host}"
  port: {port}
  allowed_origins: []
  allowed_headers: []
  ssl:
    enabled: false

system:
  data_directory: "{data_dir}"
  instances_directory: "{data_dir}/instances"
  logs_directory: "{data_dir}/logs"
  auto_create_dirs: true

instances:
  port_range_low: 8000
  port_range_high: 9000
  max_instances: -1
  max_running_instances: -1
  enable_lru_eviction: false
  default_auto_restart: false
  default_max_restarts: 3
  default_restart_delay_seconds: 5
  default_on_demand_start: false
  on_demand_start_timeout_seconds: 120
  timeout_check_interval_minutes: 5

backends:
  llama_cpp:
    command: "llama-server"
  mlx_lm:
    command: "mlx_lm.server"
  vllm:
    command: "vllm"

auth:
  require_management_auth: false
  require_inference_auth: false
  management_keys: []
  inference_keys: []

nodes:
  local_node_id: "{node_id}"
  nodes: {{}}

log_rotation:
  enabled: true
  max_size_mb: 50
  compress: true
"#
    );

    std::fs::write(config_path, contents)?;
    println!("\nWrote configuration to: {config_path}");
    println!("Review it, then run `llamactld --config {config_path}` to start the daemon.");
    Ok(())
}

fn prompt(label: &str, default: &str) -> Result<String> {
    print!("{label} [{default}]: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();

    Ok(if trimmed.is_empty() { default.to_string() } else { trimmed.to_string() })
}
