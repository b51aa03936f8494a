//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::DispatchConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    default_timeout_ms: u64,
    force_multicast: bool,
    oob: bool,
    async_queue_capacity: usize,
    wire_format: String,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    default_timeout_ms: config.default_timeout_ms,
                    force_multicast: config.force_multicast,
                    oob: config.oob,
                    async_queue_capacity: config.async_queue_capacity,
                    wire_format: format!("{:?}", config.wire_format).to_lowercase(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &DispatchConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.default_timeout_ms < 100 {
        warnings.push(format!(
            "default_timeout_ms is {}ms - rounds may time out under normal load",
            config.default_timeout_ms
        ));
    }

    if config.force_multicast {
        warnings.push(
            "force_multicast is set - replay-eligible rounds will also be broadcast".to_string(),
        );
    }

    if config.async_queue_capacity < 16 {
        warnings.push(format!(
            "async_queue_capacity is {} - background rounds will be dropped under bursts",
            config.async_queue_capacity
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Default timeout: {}ms", summary.default_timeout_ms);
            println!("  Force multicast: {}", summary.force_multicast);
            println!("  Out-of-band: {}", summary.oob);
            println!("  Async queue capacity: {}", summary.async_queue_capacity);
            println!("  Wire format: {}", summary.wire_format);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
