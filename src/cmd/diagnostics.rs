//! Diagnostics command - environment, port-range, and docker reachability
//! sanity checks for an operator bringing up a new deployment.

use anyhow::Result;
use std::process::Stdio;
use tokio::process::Command;

use llamactld::config::Configuration;

pub async fn run(config_path: &str) -> Result<()> {
    println!("llamactld diagnostics");
    println!("======================\n");

    println!("System information:");
    println!("-------------------");
    println!("  CPUs: {}", num_cpus::get());
    println!("  OS: {}", std::env::consts::OS);
    println!("  Arch: {}", std::env::consts::ARCH);

    println!("\nConfiguration:");
    println!("--------------");
    match Configuration::load(config_path) {
        Ok(config) => {
            println!("  Loaded from: {}", config_path);
            check_directories(&config);
            check_port_range(&config);
            check_docker(&config).await;
        }
        Err(e) => {
            println!("  Failed to load '{}': {}", config_path, e);
        }
    }

    println!("\nDiagnostics complete.");
    Ok(())
}

fn check_directories(config: &Configuration) {
    for (label, dir) in [
        ("data", &config.system.data_directory),
        ("instances", &config.system.instances_directory),
        ("logs", &config.system.logs_directory),
    ] {
        let status = match std::fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => "ok",
            Ok(_) => "not a directory",
            Err(_) => "missing (will be created if auto_create_dirs is set)",
        };
        println!("  {} directory {}: {}", label, dir.display(), status);
    }
}

fn check_port_range(config: &Configuration) {
    let lo = config.instances.port_range_low;
    let hi = config.instances.port_range_high;
    let total = (hi as u32).saturating_sub(lo as u32) + 1;
    println!("  port range: {}-{} ({} ports)", lo, hi, total);
    if lo >= hi {
        println!("    warning: port_range_low >= port_range_high");
    }
}

async fn check_docker(config: &Configuration) {
    let needs_docker = [&config.backends.llama_cpp, &config.backends.mlx_lm, &config.backends.vllm]
        .iter()
        .any(|b| b.docker.enabled);

    if !needs_docker {
        println!("  docker: not required by any configured backend");
        return;
    }

    match Command::new("docker").arg("info").stdout(Stdio::null()).stderr(Stdio::null()).status().await {
        Ok(status) if status.success() => println!("  docker: reachable"),
        Ok(status) => println!("  docker: `docker info` exited with {status}"),
        Err(e) => println!("  docker: not reachable ({e})"),
    }
}
