//! Config file loading and writing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info};

use crate::env::{apply_env_overrides, resolve_env_vars};
use crate::schema::EngineConfig;

const CONFIG_FILE_NAME: &str = "keel.yaml";

/// Resolve the config directory.
/// Priority: `KEEL_CONFIG_DIR` env > `<platform config dir>/keel` > `./.keel`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("KEEL_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .map(|dir| dir.join("keel"))
        .unwrap_or_else(|| PathBuf::from(".keel"))
}

pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Parse a YAML document: env references resolved, then typed.
pub fn parse_config(raw: &str) -> Result<EngineConfig> {
    let tree: Value = if raw.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_yaml::from_str(raw).context("Failed to parse config YAML")?
    };
    // A document holding only comments parses as null.
    let tree = if tree.is_null() {
        Value::Object(Default::default())
    } else {
        tree
    };
    let tree = resolve_env_vars(&tree)?;
    serde_json::from_value(tree).context("Config does not match the engine schema")
}

/// Load config from disk. A missing file yields defaults; `KEEL_*` overrides apply either way.
pub async fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(apply_env_overrides(EngineConfig::default()));
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = parse_config(&raw)
        .with_context(|| format!("Invalid config at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    Ok(apply_env_overrides(config))
}

/// Write config atomically (temp file, then rename).
pub async fn write_config(config: &EngineConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    let tmp_path = path.with_extension("yaml.tmp");
    fs::write(&tmp_path, yaml.as_bytes())
        .await
        .with_context(|| format!("Failed to write temp config: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to move config into place: {}", path.display()))?;

    debug!(path = %path.display(), "Config written");
    Ok(())
}
