use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sysupd_core::{AlpmConfig, DatabaseConfig};

/// Engine options and sync databases for one upgrade run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRequest {
    pub alpm: AlpmConfig,
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

impl UpgradeRequest {
    pub fn from_toml(raw: &str) -> Result<Self> {
        let request: Self = toml::from_str(raw).context("failed parsing upgrade config")?;
        request.validate()?;
        Ok(request)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.alpm.validate().context("invalid [alpm] section")?;
        let mut seen = BTreeSet::new();
        for database in &self.databases {
            database.validate()?;
            if !seen.insert(database.name.as_str()) {
                return Err(anyhow!("database '{}' is configured twice", database.name));
            }
        }
        Ok(())
    }
}
