use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{AlpmConfig, DatabaseConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Method {
    Init,
    InitAlpm,
    AddDb,
    SyncDbs,
    GetPackages,
    SysUpgrade,
    NoSysUpgrade,
    FreeAlpm,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::Init,
        Method::InitAlpm,
        Method::AddDb,
        Method::SyncDbs,
        Method::GetPackages,
        Method::SysUpgrade,
        Method::NoSysUpgrade,
        Method::FreeAlpm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::InitAlpm => "InitAlpm",
            Self::AddDb => "AddDb",
            Self::SyncDbs => "SyncDbs",
            Self::GetPackages => "GetPackages",
            Self::SysUpgrade => "SysUpgrade",
            Self::NoSysUpgrade => "NoSysUpgrade",
            Self::FreeAlpm => "FreeAlpm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|method| method.as_str() == value)
    }

    /// Methods that operate on an open engine handle.
    pub fn needs_handle(self) -> bool {
        !matches!(self, Self::Init | Self::InitAlpm | Self::FreeAlpm)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum MethodCall {
    Init { sender: String },
    InitAlpm(Box<AlpmConfig>),
    AddDb(DatabaseConfig),
    SyncDbs,
    GetPackages,
    SysUpgrade,
    NoSysUpgrade,
    FreeAlpm,
}

impl MethodCall {
    pub fn method(&self) -> Method {
        match self {
            Self::Init { .. } => Method::Init,
            Self::InitAlpm(_) => Method::InitAlpm,
            Self::AddDb(_) => Method::AddDb,
            Self::SyncDbs => Method::SyncDbs,
            Self::GetPackages => Method::GetPackages,
            Self::SysUpgrade => Method::SysUpgrade,
            Self::NoSysUpgrade => Method::NoSysUpgrade,
            Self::FreeAlpm => Method::FreeAlpm,
        }
    }
}
