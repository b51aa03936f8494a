//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::commands::load_config;

/// Effective configuration for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    config_path: String,
    default_timeout_ms: u64,
    force_multicast: bool,
    force_multicast_env: Option<String>,
    oob: bool,
    async_queue_capacity: usize,
    wire_format: contracts::WireFormat,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    let config = load_config(&args.config)?;
    let config_info = ConfigInfo {
        config_path: args.config.display().to_string(),
        default_timeout_ms: config.default_timeout_ms,
        force_multicast: config.force_multicast,
        force_multicast_env: std::env::var(config_loader::FORCE_MULTICAST_ENV).ok(),
        oob: config.oob,
        async_queue_capacity: config.async_queue_capacity,
        wire_format: config.wire_format,
    };

    if args.json {
        let json =
            serde_json::to_string_pretty(&config_info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&config_info);
    }

    Ok(())
}

fn print_config_info(info: &ConfigInfo) {
    println!("Configuration: {}", info.config_path);
    println!();
    println!("Rounds");
    println!("  ├─ Default timeout: {}ms", info.default_timeout_ms);
    match &info.force_multicast_env {
        Some(raw) => println!(
            "  ├─ Force multicast: {} ({}={})",
            info.force_multicast,
            config_loader::FORCE_MULTICAST_ENV,
            raw
        ),
        None => println!("  ├─ Force multicast: {}", info.force_multicast),
    }
    println!("  └─ Out-of-band: {}", info.oob);
    println!();
    println!("Background queue");
    println!("  └─ Capacity: {}", info.async_queue_capacity);
    println!();
    println!("Wire");
    println!("  └─ Format: {:?}", info.wire_format);
}
