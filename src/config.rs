use std::path::PathBuf;

use anyhow::Result;
use serde::Deserialize;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MODEL_PATH: &str = "model/mnist.safetensors";

#[derive(Deserialize, Default)]
pub struct Config {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub model: Option<PathBuf>,
}

pub fn load_config() -> Result<Config> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(Config::default());
    };

    let config_path = config_dir.join("digitd").join("config.toml");
    if !config_path.exists() {
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(&config_path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}
