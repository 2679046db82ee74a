//! Command line configuration.
//!
//! Stored as TOML at `$BLOBFERRY_CONFIG`, or by default:
//! - Linux: `~/.config/blobferry/blobferry.toml`
//! - Windows: `%APPDATA%/blobferry/blobferry.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use blobferry_transfer::EngineConfig;

const CONFIG_ENV: &str = "BLOBFERRY_CONFIG";

/// blobferry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// JSON file holding transfer and chunk records.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Directory served by the `local` backend.
    #[serde(default = "default_remote_root")]
    pub remote_root: PathBuf,

    /// Root that resolved content handles are looked up under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_root: Option<PathBuf>,

    /// Tracing filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default)]
    pub engine: EngineConfig,
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("blobferry")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".local").join("share").join("blobferry")
    }
}

fn default_store_path() -> PathBuf {
    data_dir().join("transfers.json")
}

fn default_remote_root() -> PathBuf {
    data_dir().join("remote")
}

fn default_log_filter() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            remote_root: default_remote_root(),
            resolved_root: None,
            log_filter: default_log_filter(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from `path` (or the default location),
    /// writing defaults there first if the file does not exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path(),
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.engine
            .validate()
            .map_err(|reason| anyhow::anyhow!("invalid [engine] section: {reason}"))
    }
}

fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("blobferry").join("blobferry.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("blobferry")
            .join("blobferry.toml")
    }
}
