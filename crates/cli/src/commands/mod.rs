//! Command implementations.

mod info;
mod simulate;
mod validate;

pub use info::run_info;
pub use simulate::run_simulate;
pub use validate::run_validate;

use std::path::Path;

use anyhow::{Context, Result};
use contracts::DispatchConfig;

use crate::error::CliError;

/// Load a configuration file, failing early if it does not exist
pub(crate) fn load_config(path: &Path) -> Result<DispatchConfig> {
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()).into());
    }
    config_loader::ConfigLoader::load_from_path(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}
