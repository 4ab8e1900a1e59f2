use std::collections::HashMap;

use sysupd_core::{
    ChangeKind, EngineEvent, EventKind, PackageChange, Progress, ProgressKind, TransactionStep,
};

/// Weighted segments of the aggregate progress bar, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Connect,
    Init,
    Register,
    Sync,
    FetchList,
    Download,
    Integrity,
    LoadFiles,
    FileConflicts,
    DiskSpace,
    Install,
}

impl Stage {
    fn entered_by(step: TransactionStep) -> Option<Self> {
        match step {
            TransactionStep::Downloading => Some(Self::Download),
            TransactionStep::Integrity => Some(Self::Integrity),
            TransactionStep::LoadingFiles => Some(Self::LoadFiles),
            TransactionStep::FileConflicts => Some(Self::FileConflicts),
            TransactionStep::DiskSpace => Some(Self::DiskSpace),
            TransactionStep::Upgrading => Some(Self::Install),
            _ => None,
        }
    }

    fn measured_by(kind: ProgressKind) -> Option<Self> {
        match kind {
            ProgressKind::IntegrityStart => Some(Self::Integrity),
            ProgressKind::LoadStart => Some(Self::LoadFiles),
            ProgressKind::ConflictsStart => Some(Self::FileConflicts),
            ProgressKind::DiskspaceStart => Some(Self::DiskSpace),
            _ => None,
        }
    }
}

const PREFIX: [(Stage, f64); 5] = [
    (Stage::Connect, 0.01),
    (Stage::Init, 0.01),
    (Stage::Register, 0.02),
    (Stage::Sync, 0.08),
    (Stage::FetchList, 0.03),
];

/// Share of the bar taken by the steps before the commit.
pub const PREFIX_WEIGHT: f64 = 0.15;

const COMMIT_WITH_DOWNLOAD: [(Stage, f64); 6] = [
    (Stage::Download, 0.42),
    (Stage::Integrity, 0.01),
    (Stage::LoadFiles, 0.01),
    (Stage::FileConflicts, 0.01),
    (Stage::DiskSpace, 0.01),
    (Stage::Install, 0.54),
];

const COMMIT_WITHOUT_DOWNLOAD: [(Stage, f64); 5] = [
    (Stage::Integrity, 0.05),
    (Stage::LoadFiles, 0.05),
    (Stage::FileConflicts, 0.05),
    (Stage::DiskSpace, 0.05),
    (Stage::Install, 0.80),
];

/// Ordered stage weights of one run. The commit table is scaled into what
/// the prefix leaves, so the whole table sums to 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    stages: Vec<(Stage, f64)>,
}

impl WeightTable {
    pub fn with_download() -> Self {
        Self::build(&COMMIT_WITH_DOWNLOAD)
    }

    pub fn without_download() -> Self {
        Self::build(&COMMIT_WITHOUT_DOWNLOAD)
    }

    fn build(commit: &[(Stage, f64)]) -> Self {
        let scale = 1.0 - PREFIX_WEIGHT;
        let stages = PREFIX
            .iter()
            .copied()
            .chain(commit.iter().map(|(stage, weight)| (*stage, weight * scale)))
            .collect();
        Self { stages }
    }

    pub fn stages(&self) -> &[(Stage, f64)] {
        &self.stages
    }

    pub fn total(&self) -> f64 {
        self.stages.iter().map(|(_, weight)| weight).sum()
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.position(stage).is_some()
    }

    pub fn weight(&self, stage: Stage) -> f64 {
        self.position(stage)
            .map(|index| self.stages[index].1)
            .unwrap_or(0.0)
    }

    /// Combined weight of the stages before `stage`.
    pub fn offset(&self, stage: Stage) -> f64 {
        let end = self.position(stage).unwrap_or(self.stages.len());
        self.stages[..end].iter().map(|(_, weight)| weight).sum()
    }

    fn position(&self, stage: Stage) -> Option<usize> {
        self.stages.iter().position(|(candidate, _)| *candidate == stage)
    }
}

/// Per-package progress, tracked apart from the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRow {
    pub name: String,
    pub kind: ChangeKind,
    pub download_size: u64,
    pub downloaded: u64,
    /// Bytes this package weighs in the install stage.
    pub install_size: u64,
    pub percent: u8,
    pub done: bool,
}

impl PackageRow {
    fn new(change: &PackageChange) -> Self {
        Self {
            name: change.name.clone(),
            kind: change.kind(),
            download_size: change.dl_size,
            downloaded: 0,
            install_size: change.accounted_size(),
            percent: 0,
            done: false,
        }
    }

    pub fn download_fraction(&self) -> f64 {
        if self.download_size == 0 {
            return 1.0;
        }
        (self.downloaded as f64 / self.download_size as f64).min(1.0)
    }
}

/// Turns the signal stream of one run into a monotonic aggregate fraction
/// and per-package rows.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    table: WeightTable,
    stage: Stage,
    fraction: f64,
    reported: f64,
    step: TransactionStep,
    sync_total: u32,
    sync_processed: u32,
    rows: HashMap<String, PackageRow>,
    /// Download file stem (`name-version`) to package name.
    stems: HashMap<String, String>,
    files: HashMap<String, u64>,
    download_total: u64,
    install_total: u64,
    installed: HashMap<String, u64>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            table: WeightTable::with_download(),
            stage: Stage::Connect,
            fraction: 0.0,
            reported: 0.0,
            step: TransactionStep::None,
            sync_total: 0,
            sync_processed: 0,
            rows: HashMap::new(),
            stems: HashMap::new(),
            files: HashMap::new(),
            download_total: 0,
            install_total: 0,
            installed: HashMap::new(),
        }
    }

    pub fn table(&self) -> &WeightTable {
        &self.table
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn step(&self) -> TransactionStep {
        self.step
    }

    pub fn set_step(&mut self, step: TransactionStep) {
        self.step = step;
    }

    pub fn row(&self, name: &str) -> Option<&PackageRow> {
        self.rows.get(name)
    }

    pub fn rows(&self) -> impl Iterator<Item = &PackageRow> {
        self.rows.values()
    }

    /// Aggregate progress; never lower than any value returned before.
    pub fn global(&mut self) -> f64 {
        let raw = self.table.offset(self.stage) + self.fraction * self.table.weight(self.stage);
        self.reported = self.reported.max(raw.min(1.0));
        self.reported
    }

    pub fn enter(&mut self, stage: Stage) {
        if !self.table.contains(stage) || self.table.offset(stage) < self.table.offset(self.stage) {
            return;
        }
        if stage != self.stage {
            self.stage = stage;
            self.fraction = 0.0;
        }
    }

    pub fn set_fraction(&mut self, fraction: f64) {
        self.fraction = fraction.clamp(0.0, 1.0);
    }

    pub fn register_progress(&mut self, registered: usize, total: usize) {
        self.enter(Stage::Register);
        if total > 0 {
            self.set_fraction(registered as f64 / total as f64);
        }
    }

    pub fn sync_count(&mut self, count: u32) {
        self.enter(Stage::Sync);
        self.step = TransactionStep::SyncingDbs;
        self.sync_total = count;
        self.sync_processed = 0;
        if count == 0 {
            self.set_fraction(1.0);
        }
    }

    /// A database finished synchronizing, successfully or not.
    pub fn sync_db_end(&mut self) {
        if self.sync_total == 0 {
            return;
        }
        self.sync_processed = (self.sync_processed + 1).min(self.sync_total);
        self.set_fraction(self.sync_processed as f64 / self.sync_total as f64);
    }

    /// Builds the package rows and picks the weight table for the commit.
    pub fn set_packages(&mut self, changes: &[PackageChange]) {
        self.rows.clear();
        self.stems.clear();
        self.files.clear();
        self.installed.clear();
        for change in changes {
            if let Some(stem) = change.file_stem() {
                self.stems.insert(stem, change.name.clone());
            }
            self.rows.insert(change.name.clone(), PackageRow::new(change));
        }
        self.download_total = changes.iter().map(|change| change.dl_size).sum();
        self.install_total = changes.iter().map(PackageChange::accounted_size).sum();
        self.table = if self.download_total > 0 {
            WeightTable::with_download()
        } else {
            WeightTable::without_download()
        };
        self.step = TransactionStep::WaitingConfirmation;
    }

    pub fn finish(&mut self) {
        if let Some((last, _)) = self.table.stages().last().copied() {
            self.stage = last;
            self.fraction = 1.0;
        }
        self.step = TransactionStep::None;
    }

    /// Applies one engine event; returns the row it touched, if any.
    pub fn apply(&mut self, event: &EngineEvent) -> Option<PackageRow> {
        match event {
            EngineEvent::Event(kind) => {
                self.event(*kind);
                None
            }
            EngineEvent::TotalDownload(total) => {
                if *total > 0 {
                    self.download_total = *total;
                }
                None
            }
            EngineEvent::Downloading {
                file,
                transferred,
                total,
            } => self.downloading(file, *transferred, *total),
            EngineEvent::Progress(progress) => self.progress(progress),
            EngineEvent::Package(package) => {
                let name = package.package().to_string();
                let row = self.rows.get_mut(&name)?;
                row.percent = 100;
                row.done = true;
                self.installed.insert(name, row.install_size);
                let row = row.clone();
                self.update_install_fraction();
                Some(row)
            }
            _ => None,
        }
    }

    fn event(&mut self, kind: EventKind) {
        let Some(step) = TransactionStep::entered_by(kind) else {
            return;
        };
        self.step = step;
        if let Some(stage) = Stage::entered_by(step) {
            self.enter(stage);
        }
    }

    fn downloading(&mut self, file: &str, transferred: u64, total: u64) -> Option<PackageRow> {
        if self.stage != Stage::Download {
            return None;
        }
        self.files.insert(file.to_string(), transferred);
        if self.download_total > 0 {
            let done: u64 = self.files.values().sum();
            self.set_fraction(done as f64 / self.download_total as f64);
        }

        let name = self.stems.get(download_stem(file)?)?;
        let row = self.rows.get_mut(name)?;
        row.downloaded = transferred;
        if total > 0 {
            row.download_size = total;
        }
        Some(row.clone())
    }

    fn progress(&mut self, progress: &Progress) -> Option<PackageRow> {
        let percent = progress.percent.min(100);
        if !progress.kind.is_package_operation() {
            if Stage::measured_by(progress.kind) == Some(self.stage) {
                self.set_fraction(f64::from(percent) / 100.0);
            }
            return None;
        }

        let row = self.rows.get_mut(&progress.package)?;
        row.percent = row.percent.max(percent);
        let weighted = row.install_size * u64::from(row.percent) / 100;
        let row = row.clone();
        self.installed.insert(row.name.clone(), weighted);
        if self.stage == Stage::Install {
            if self.install_total > 0 {
                self.update_install_fraction();
            } else if progress.total > 0 {
                let done = progress.current.saturating_sub(1) as f64 + f64::from(percent) / 100.0;
                self.set_fraction(done / f64::from(progress.total));
            }
        }
        Some(row)
    }

    fn update_install_fraction(&mut self) {
        if self.stage != Stage::Install || self.install_total == 0 {
            return;
        }
        let done: u64 = self.installed.values().sum();
        self.set_fraction(done as f64 / self.install_total as f64);
    }
}

/// `name-version` part of a package file name such as
/// `linux-6.1.2-1-x86_64.pkg.tar.zst`.
fn download_stem(file: &str) -> Option<&str> {
    let (base, _) = file.split_once(".pkg.tar")?;
    let (stem, _arch) = base.rsplit_once('-')?;
    Some(stem)
}
