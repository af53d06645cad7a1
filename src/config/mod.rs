use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::auth::DEFAULT_SECRET_PREFIX;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Directory holding the SQLite database.
    pub data_dir: PathBuf,
    /// Prefix of generated application token secrets.
    pub token_prefix: String,
    /// `tracing-subscriber` filter directive used by the binary.
    pub log_filter: String,
}

impl MetadataConfig {
    /// Reads a TOML config file. Missing keys fall back to their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: MetadataConfig =
            toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.token_prefix.is_empty() {
            return Err(Error::Config("token_prefix cannot be empty".to_string()));
        }
        if !self
            .token_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(Error::Config(format!(
                "token_prefix can only contain alphanumeric characters: {}",
                self.token_prefix
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("repometa.db")
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            token_prefix: DEFAULT_SECRET_PREFIX.to_string(),
            log_filter: "repometa=info".to_string(),
        }
    }
}
