//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Apply environment overrides (`GRIDREP_FORCE_MULTICAST`)
//! - Validate configuration legality
//! - Produce a `DispatchConfig`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("gridrep.toml")).unwrap();
//! println!("Timeout: {}ms", config.default_timeout_ms);
//! ```

mod parser;
mod validator;

pub use contracts::DispatchConfig;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// Environment variable that forces broadcast routing for unfiltered rounds
pub const FORCE_MULTICAST_ENV: &str = "GRIDREP_FORCE_MULTICAST";

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Invalid environment override
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<DispatchConfig, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string, applying process environment overrides
    ///
    /// # Errors
    /// - Parse failure
    /// - Invalid environment override
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<DispatchConfig, ContractError> {
        Self::load_with_env(content, format, |key| std::env::var(key).ok())
    }

    /// Load configuration from string with an explicit environment lookup
    pub fn load_with_env<F>(
        content: &str,
        format: ConfigFormat,
        env: F,
    ) -> Result<DispatchConfig, ContractError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = parser::parse(content, format)?;
        Self::apply_env_overrides(&mut config, env)?;
        validator::validate(&config)?;
        Ok(config)
    }

    /// Serialize DispatchConfig to TOML string
    pub fn to_toml(config: &DispatchConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize DispatchConfig to JSON string
    pub fn to_json(config: &DispatchConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn apply_env_overrides<F>(config: &mut DispatchConfig, env: F) -> Result<(), ContractError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = env(FORCE_MULTICAST_ENV) {
            config.force_multicast = parse_flag(&raw).ok_or_else(|| {
                ContractError::config_validation(
                    FORCE_MULTICAST_ENV,
                    format!("expected a boolean, got '{raw}'"),
                )
            })?;
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
