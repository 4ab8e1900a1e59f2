use std::collections::BTreeMap;

use sysupd_core::{ChangeKind, PackageChange};

/// What the prepared transaction will do, shown before confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionSummary {
    pub counts: BTreeMap<ChangeKind, usize>,
    pub download_size: u64,
    pub installed_size: u64,
    pub removed_size: u64,
    /// Net change of the installed size.
    pub size_delta: i64,
}

impl TransactionSummary {
    pub fn from_changes(changes: &[PackageChange]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            *summary.counts.entry(change.kind()).or_default() += 1;
            summary.download_size += change.dl_size;
            summary.size_delta += change.size_delta();
            if change.kind() == ChangeKind::Remove {
                summary.removed_size += change.old_size;
            } else {
                summary.installed_size += change.new_size;
            }
        }
        summary
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// One line per non-zero change kind, e.g. `upgrade: 3`.
    pub fn count_lines(&self) -> Vec<String> {
        self.counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(kind, count)| format!("{}: {count}", kind.as_str()))
            .collect()
    }
}

/// Binary-prefixed size the way pacman prints it, e.g. `1.50 MiB`.
pub fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let sign = if bytes < 0 { "-" } else { "" };
    let mut value = bytes.unsigned_abs() as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{sign}{value:.0} {}", UNITS[unit])
    } else {
        format!("{sign}{value:.2} {}", UNITS[unit])
    }
}
