use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::CliError;

/// Optional TOML configuration. Explicit CLI flags always win over values
/// loaded here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub clients: Option<u64>,
    pub certificates: Option<u64>,
    pub seed: Option<u64>,
    pub db_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub buffer_size: Option<usize>,
}

pub fn load_config(path: Option<&Path>) -> Result<CliConfig, CliError> {
    let Some(path) = path else {
        return Ok(CliConfig::default());
    };
    let contents = std::fs::read_to_string(path)?;
    toml::from_str(&contents).map_err(|err| {
        CliError::InvalidConfig(format!("{}: {}", path.display(), err))
    })
}
