//! Optional defaults read from `<config dir>/i2con/settings.json`.
//!
//! ```json
//! { "host": "192.168.1.20", "bus": 1, "port": 3490, "timeout_secs": 5 }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: Option<String>,
    pub bus: Option<i8>,
    pub port: Option<u16>,
    pub bind: Option<IpAddr>,
    pub timeout_secs: Option<u64>,
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("i2con").join("settings.json"))
    }

    /// Load from `path`, or from the default location when `None`. A missing
    /// default file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}
