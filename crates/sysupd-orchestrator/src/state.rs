use std::fmt;

/// Position of one upgrade run. Runs are strictly sequential; every
/// automated state falls back to `Idle` on error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeState {
    #[default]
    Idle,
    Connecting,
    Initializing,
    RegisteringDbs { index: usize, total: usize },
    SyncingDbs,
    FetchingPackageList,
    WaitingForConfirmation,
    Confirmed,
    Committing,
    Done,
    Declined,
}

impl UpgradeState {
    pub fn can_transition_to(&self, next: &UpgradeState) -> bool {
        use UpgradeState::*;

        match (*self, *next) {
            (Idle, Connecting) => true,
            (Connecting, Initializing) => true,
            (Initializing, RegisteringDbs { index: 0, total }) => total > 0,
            (Initializing, SyncingDbs) => true,
            (
                RegisteringDbs { index, total },
                RegisteringDbs {
                    index: next_index,
                    total: next_total,
                },
            ) => next_total == total && next_index == index + 1 && next_index < total,
            (RegisteringDbs { index, total }, SyncingDbs) => index + 1 == total,
            (SyncingDbs, FetchingPackageList) => true,
            (FetchingPackageList, WaitingForConfirmation) => true,
            // Nothing to upgrade.
            (FetchingPackageList, Done) => true,
            (WaitingForConfirmation, Confirmed | Declined) => true,
            (Confirmed, Committing) => true,
            (Committing, Done) => true,
            (Declined | Done, Idle) => true,
            (from, Idle) => from.is_automated(),
            _ => false,
        }
    }

    /// States that run without a human decision and may fail.
    pub fn is_automated(&self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::Initializing
                | Self::RegisteringDbs { .. }
                | Self::SyncingDbs
                | Self::FetchingPackageList
                | Self::Confirmed
                | Self::Committing
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Initializing => "initializing",
            Self::RegisteringDbs { .. } => "registering databases",
            Self::SyncingDbs => "synchronizing databases",
            Self::FetchingPackageList => "computing upgrade",
            Self::WaitingForConfirmation => "waiting for confirmation",
            Self::Confirmed => "confirmed",
            Self::Committing => "upgrading",
            Self::Done => "done",
            Self::Declined => "declined",
        }
    }
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegisteringDbs { index, total } => {
                write!(f, "{} ({}/{total})", self.label(), index + 1)
            }
            other => f.write_str(other.label()),
        }
    }
}
