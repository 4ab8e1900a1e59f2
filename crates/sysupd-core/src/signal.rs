use serde::{Deserialize, Serialize};

use crate::method::Method;
use crate::package::PackageChange;
use crate::question::Question;

/// A signal addressed to the session's registered sender name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub destination: String,
    pub signal: Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "args")]
pub enum Signal {
    MethodFinished { method: Method },
    MethodFailed { method: Method, message: String },
    SyncDbsCount(u32),
    SyncDbStart(String),
    SyncDbEnd(SyncDbResult),
    /// Completion of `GetPackages`, delivered instead of `MethodFinished`.
    GetPackagesFinished(Vec<PackageChange>),
    Engine(EngineEvent),
    Question(Question),
}

impl Signal {
    pub fn finished(method: Method) -> Self {
        Self::MethodFinished { method }
    }

    pub fn failed(method: Method, message: impl Into<String>) -> Self {
        Self::MethodFailed {
            method,
            message: message.into(),
        }
    }

    /// The method whose lifecycle this signal completes, if any.
    pub fn completes(&self) -> Option<Method> {
        match self {
            Self::MethodFinished { method } | Self::MethodFailed { method, .. } => Some(*method),
            Self::GetPackagesFinished(_) => Some(Method::GetPackages),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDbResult {
    Success,
    Failure,
    NotNeeded,
}

/// Data signals raised from inside the package-manager engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "args")]
pub enum EngineEvent {
    Debug(String),
    Log { level: LogLevel, text: String },
    Event(EventKind),
    Progress(Progress),
    TotalDownload(u64),
    Downloading {
        file: String,
        transferred: u64,
        total: u64,
    },
    Package(PackageEvent),
    RetrievingPkgs { repo: String },
    Scriptlet(String),
    DeltaGenerating { delta: String, dest: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PackageEvent {
    Installed {
        package: String,
        version: String,
        #[serde(default)]
        optdeps: Vec<String>,
    },
    Removed {
        package: String,
        version: String,
    },
    Upgraded {
        package: String,
        old_version: String,
        new_version: String,
        #[serde(default)]
        optdeps: Vec<String>,
    },
    Downgraded {
        package: String,
        old_version: String,
        new_version: String,
        #[serde(default)]
        optdeps: Vec<String>,
    },
}

impl PackageEvent {
    pub fn package(&self) -> &str {
        match self {
            Self::Installed { package, .. }
            | Self::Removed { package, .. }
            | Self::Upgraded { package, .. }
            | Self::Downgraded { package, .. } => package,
        }
    }

    /// Optional dependencies newly offered by this package.
    pub fn optdeps(&self) -> &[String] {
        match self {
            Self::Installed { optdeps, .. }
            | Self::Upgraded { optdeps, .. }
            | Self::Downgraded { optdeps, .. } => optdeps,
            Self::Removed { .. } => &[],
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Installed {
                package, version, ..
            } => format!("installed {package} ({version})"),
            Self::Removed { package, version } => format!("removed {package} ({version})"),
            Self::Upgraded {
                package,
                old_version,
                new_version,
                ..
            } => format!("upgraded {package} ({old_version} -> {new_version})"),
            Self::Downgraded {
                package,
                old_version,
                new_version,
                ..
            } => format!("downgraded {package} ({old_version} -> {new_version})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub kind: ProgressKind,
    pub package: String,
    pub percent: u8,
    /// Number of targets in the current stage.
    pub total: u32,
    /// One-based index of the target being processed.
    pub current: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressKind {
    AddStart,
    UpgradeStart,
    DowngradeStart,
    ReinstallStart,
    RemoveStart,
    ConflictsStart,
    DiskspaceStart,
    IntegrityStart,
    LoadStart,
    KeyringStart,
}

impl ProgressKind {
    /// Per-package install/removal progress, as opposed to whole-stage checks.
    pub fn is_package_operation(self) -> bool {
        matches!(
            self,
            Self::AddStart
                | Self::UpgradeStart
                | Self::DowngradeStart
                | Self::ReinstallStart
                | Self::RemoveStart
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    CheckDepsStart,
    CheckDepsDone,
    ResolveDepsStart,
    ResolveDepsDone,
    InterConflictsStart,
    InterConflictsDone,
    RetrieveStart,
    RetrieveDone,
    RetrieveFailed,
    IntegrityStart,
    IntegrityDone,
    KeyringStart,
    KeyringDone,
    KeyDownloadStart,
    KeyDownloadDone,
    LoadStart,
    LoadDone,
    FileConflictsStart,
    FileConflictsDone,
    DiskspaceStart,
    DiskspaceDone,
    DeltaIntegrityStart,
    DeltaIntegrityDone,
    DeltaPatchesStart,
    DeltaPatchesDone,
    DeltaPatchFailed,
    TransactionStart,
    TransactionDone,
}

impl EventKind {
    pub fn describe(self) -> &'static str {
        match self {
            Self::CheckDepsStart => "checking dependencies...",
            Self::CheckDepsDone => "dependencies checked",
            Self::ResolveDepsStart => "resolving dependencies...",
            Self::ResolveDepsDone => "dependencies resolved",
            Self::InterConflictsStart => "looking for inter-conflicts...",
            Self::InterConflictsDone => "inter-conflicts checked",
            Self::RetrieveStart => "downloading packages...",
            Self::RetrieveDone => "packages downloaded",
            Self::RetrieveFailed => "failed to download packages",
            Self::IntegrityStart => "checking package integrity...",
            Self::IntegrityDone => "package integrity checked",
            Self::KeyringStart => "checking keys in keyring...",
            Self::KeyringDone => "keyring checked",
            Self::KeyDownloadStart => "downloading required keys...",
            Self::KeyDownloadDone => "required keys downloaded",
            Self::LoadStart => "loading package files...",
            Self::LoadDone => "package files loaded",
            Self::FileConflictsStart => "checking for file conflicts...",
            Self::FileConflictsDone => "file conflicts checked",
            Self::DiskspaceStart => "checking available disk space...",
            Self::DiskspaceDone => "disk space checked",
            Self::DeltaIntegrityStart => "checking delta integrity...",
            Self::DeltaIntegrityDone => "delta integrity checked",
            Self::DeltaPatchesStart => "applying deltas...",
            Self::DeltaPatchesDone => "deltas applied",
            Self::DeltaPatchFailed => "failed to apply delta",
            Self::TransactionStart => "processing package changes...",
            Self::TransactionDone => "package changes processed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Error,
    Warning,
    Debug,
    Function,
}
