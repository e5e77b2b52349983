//! Configuration file parsing for the driver.

use jsbridge_core::EngineConfig;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Engine flags, with the same names as on the command line
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Load configuration from `path`.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
    Ok(config)
}

/// Split the driver's own options (`--config <file>`, `--config=<file>`,
/// `--help`, `--version`) from everything else.
///
/// Both halves start with the program name. Parsing stops at `--`, which
/// stays with the other arguments.
pub fn split_driver_args(args: &[String]) -> (Vec<String>, Vec<String>) {
    let mut driver = Vec::new();
    let mut rest = Vec::new();
    if let Some(program) = args.first() {
        driver.push(program.clone());
        rest.push(program.clone());
    }

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            rest.push(arg.clone());
            rest.extend(iter.by_ref().cloned());
            break;
        }
        if arg == "--config" {
            driver.push(arg.clone());
            if let Some(value) = iter.next() {
                driver.push(value.clone());
            }
        } else if arg.starts_with("--config=") || arg == "--help" || arg == "--version" {
            driver.push(arg.clone());
        } else {
            rest.push(arg.clone());
        }
    }
    (driver, rest)
}
