use anyhow::{Context, Result};
use nachos_coordinator::CoordinatorConfig;
use std::path::PathBuf;

/// Print the effective configuration, after environment overrides, as YAML.
pub fn run(path: Option<PathBuf>) -> Result<()> {
    let config = match path {
        Some(path) => CoordinatorConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CoordinatorConfig::from_env().context("Invalid environment configuration")?,
    };
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
