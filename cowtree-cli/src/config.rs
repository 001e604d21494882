//! Optional TOML configuration file
//!
//! ```toml
//! log_level = "debug"
//!
//! [store]
//! cache_capacity = 256
//! lock_mode = "non_blocking"
//! sync_on_commit = false
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use cowtree_engine::StoreConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub store: StoreConfig,
    pub log_level: Option<String>,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
