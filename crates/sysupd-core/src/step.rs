use serde::{Deserialize, Serialize};

use crate::signal::EventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransactionStep {
    #[default]
    None,
    SyncingDbs,
    WaitingConfirmation,
    Confirmed,
    Downloading,
    Integrity,
    LoadingFiles,
    FileConflicts,
    DiskSpace,
    Upgrading,
}

impl TransactionStep {
    /// Step entered when the engine reports the given event, if any.
    pub fn entered_by(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::RetrieveStart => Some(Self::Downloading),
            EventKind::IntegrityStart => Some(Self::Integrity),
            EventKind::LoadStart => Some(Self::LoadingFiles),
            EventKind::FileConflictsStart => Some(Self::FileConflicts),
            EventKind::DiskspaceStart => Some(Self::DiskSpace),
            EventKind::TransactionStart => Some(Self::Upgrading),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "idle",
            Self::SyncingDbs => "synchronizing package databases",
            Self::WaitingConfirmation => "waiting for confirmation",
            Self::Confirmed => "starting system upgrade",
            Self::Downloading => "downloading packages",
            Self::Integrity => "checking package integrity",
            Self::LoadingFiles => "loading package files",
            Self::FileConflicts => "checking for file conflicts",
            Self::DiskSpace => "checking available disk space",
            Self::Upgrading => "upgrading packages",
        }
    }
}
