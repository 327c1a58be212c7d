//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub force: bool,
}

/// Render a starter config: every default spelled out plus a commented
/// example site
pub fn render_config_toml(config: &Config) -> Result<String> {
    let body = toml::to_string_pretty(config)?;
    Ok(format!(
        "# siteseek configuration\n\
         #\n\
         # Add one [[sites]] table per website to index:\n\
         #\n\
         # [[sites]]\n\
         # url = \"https://example.com\"\n\
         # name = \"Example\"\n\
         \n{}",
        body
    ))
}

/// Write a default config and create the index database
pub async fn cmd_init(options: InitOptions) -> Result<Config> {
    let InitOptions {
        base_dir,
        config_path,
        force,
    } = options;

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    let mut config = Config::default();
    config.init_paths(Some(base_dir));
    config.paths.config_file = config_path;

    if let Some(parent) = config.paths.config_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config.paths.config_file, render_config_toml(&config)?)?;
    info!("Wrote config to {:?}", config.paths.config_file);

    MetaDb::connect(&config).await?;
    info!("Index database ready at {:?}", config.paths.db_file);

    Ok(config)
}
