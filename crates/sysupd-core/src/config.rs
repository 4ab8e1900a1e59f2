use std::collections::BTreeSet;
use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Signature verification policy, stored as the engine's bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct SigLevel(u32);

const SIGLEVEL_FLAGS: [(&str, u32); 9] = [
    ("package", 1),
    ("package-optional", 1 << 1),
    ("package-marginal-ok", 1 << 2),
    ("package-unknown-ok", 1 << 3),
    ("database", 1 << 10),
    ("database-optional", 1 << 11),
    ("database-marginal-ok", 1 << 12),
    ("database-unknown-ok", 1 << 13),
    ("use-default", 1 << 31),
];

impl SigLevel {
    pub const PACKAGE: Self = Self(1);
    pub const PACKAGE_OPTIONAL: Self = Self(1 << 1);
    pub const DATABASE: Self = Self(1 << 10);
    pub const DATABASE_OPTIONAL: Self = Self(1 << 11);
    pub const USE_DEFAULT: Self = Self(1 << 31);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn parse_flag(name: &str) -> Result<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        SIGLEVEL_FLAGS
            .iter()
            .find(|(flag, _)| *flag == normalized)
            .map(|(_, bits)| Self(*bits))
            .ok_or_else(|| anyhow!("unknown siglevel flag: {name}"))
    }

    pub fn flag_names(self) -> Vec<String> {
        SIGLEVEL_FLAGS
            .iter()
            .filter(|(_, bits)| self.0 & bits == *bits)
            .map(|(name, _)| (*name).to_string())
            .collect()
    }
}

impl TryFrom<Vec<String>> for SigLevel {
    type Error = anyhow::Error;

    fn try_from(value: Vec<String>) -> Result<Self> {
        value
            .iter()
            .try_fold(Self::default(), |acc, name| Ok(acc.union(Self::parse_flag(name)?)))
    }
}

impl From<SigLevel> for Vec<String> {
    fn from(value: SigLevel) -> Self {
        value.flag_names()
    }
}

impl fmt::Display for SigLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.flag_names();
        if names.is_empty() {
            f.write_str("never")
        } else {
            f.write_str(&names.join(","))
        }
    }
}

/// Arguments of `InitAlpm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlpmConfig {
    pub rootdir: String,
    pub dbpath: String,
    #[serde(default)]
    pub logfile: Option<String>,
    #[serde(default)]
    pub gpgdir: Option<String>,
    #[serde(default)]
    pub cachedirs: Vec<String>,
    #[serde(default)]
    pub siglevel: SigLevel,
    pub arch: String,
    #[serde(default)]
    pub checkspace: bool,
    #[serde(default)]
    pub usesyslog: bool,
    #[serde(default)]
    pub usedelta: DeltaRatio,
    #[serde(default)]
    pub ignorepkgs: BTreeSet<String>,
    #[serde(default)]
    pub ignoregroups: BTreeSet<String>,
    #[serde(default)]
    pub noupgrades: Vec<String>,
    #[serde(default)]
    pub noextracts: Vec<String>,
}

impl AlpmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rootdir.trim().is_empty() {
            return Err(anyhow!("rootdir must not be empty"));
        }
        if self.dbpath.trim().is_empty() {
            return Err(anyhow!("dbpath must not be empty"));
        }
        if self.arch.trim().is_empty() {
            return Err(anyhow!("arch must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.usedelta.value()) {
            return Err(anyhow!(
                "usedelta ratio must be between 0.0 and 2.0, got {}",
                self.usedelta.value()
            ));
        }
        Ok(())
    }
}

/// Arguments of `AddDb`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    #[serde(default = "database_siglevel_default")]
    pub siglevel: SigLevel,
    #[serde(default)]
    pub servers: Vec<String>,
}

fn database_siglevel_default() -> SigLevel {
    SigLevel::USE_DEFAULT
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(anyhow!("database name must not be empty"));
        }
        if name == "local" {
            return Err(anyhow!("database name 'local' is reserved"));
        }
        if name
            .chars()
            .any(|ch| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.'))
        {
            return Err(anyhow!("database name contains invalid character(s): {name}"));
        }
        if self.servers.is_empty() {
            return Err(anyhow!("database '{name}' has no servers"));
        }
        for server in &self.servers {
            if !server.contains("://") {
                return Err(anyhow!(
                    "server for database '{name}' must be a URL: {server}"
                ));
            }
        }
        Ok(())
    }
}

/// Delta ratio kept in thousandths so the config stays `Eq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeltaRatio(i64);

impl DeltaRatio {
    pub fn new(value: f64) -> Self {
        Self((value * 1000.0).round() as i64)
    }

    pub fn value(self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl Serialize for DeltaRatio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.value())
    }
}

impl<'de> Deserialize<'de> for DeltaRatio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Self::new)
    }
}
