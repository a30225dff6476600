//! Configuration loading

use anyhow::Result;

use crate::Config;

/// Load configuration from a config file or environment variables.
///
/// Config file search order:
/// 1. `SUBSTREAM_CONFIG_PATH` environment variable (explicit path)
/// 2. `./config.toml` (current working directory)
/// 3. `/config/config.toml` (Kubernetes mount path)
/// 4. Fall back to environment variables only
pub fn load_config() -> Result<Config> {
    let config_path = std::env::var("SUBSTREAM_CONFIG_PATH")
        .ok()
        .filter(|p| std::path::Path::new(p).exists())
        .or_else(|| {
            let cwd = "config.toml";
            std::path::Path::new(cwd).exists().then(|| cwd.to_string())
        })
        .or_else(|| {
            let k8s = "/config/config.toml";
            std::path::Path::new(k8s).exists().then(|| k8s.to_string())
        });

    let config = Config::load(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {error}");
        }
        anyhow::bail!("Invalid configuration ({} errors)", errors.len());
    }

    Ok(config)
}
