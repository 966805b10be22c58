use anyhow::{Context, Result};
use jbdbms_lib::Config;
use std::path::Path;

use crate::commandline::{CliArgs, CliCommands};

pub fn load(config_file_path: &Path) -> Result<Config> {
    log::debug!("Loading config file from {config_file_path:?}");
    let config_file = std::fs::File::open(config_file_path)
        .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
    let config: Config = serde_yaml::from_reader(&config_file)
        .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
    Ok(config)
}

/// Combines the optional config file with the command line overrides.
pub fn build(args: &CliArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => load(Path::new(path))?,
        None => Config::default(),
    };
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }
    if let Some(query_interval) = args.query_interval {
        config.query_interval = query_interval;
    }
    if let Some(max_cells) = args.max_cells {
        config.max_cells = max_cells;
    }
    if let Some(max_ntcs) = args.max_ntcs {
        config.max_ntcs = max_ntcs;
    }
    if matches!(args.command, CliCommands::Name | CliCommands::All) {
        config.options.name = true;
    }
    log::debug!("Using {config:?}");
    Ok(config)
}
