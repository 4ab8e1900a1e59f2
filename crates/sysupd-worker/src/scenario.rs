use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sysupd_core::{
    AlpmConfig, ChangeKind, DatabaseConfig, EngineError, EngineEvent, EventKind, LogLevel,
    PackageChange, PackageEvent, Progress, ProgressKind, Question, ANSWER_NO,
};
use tracing::debug;

use crate::engine::{DbUpdate, EngineCallbacks, EngineFactory, PackageEngine};

const DOWNLOAD_CHUNKS: u64 = 4;

/// A scripted package-manager state: remote databases, the pending system
/// upgrade and the questions the engine will raise along the way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub databases: Vec<ScenarioDatabase>,
    #[serde(default)]
    pub packages: Vec<ScenarioPackage>,
    #[serde(default)]
    pub questions: Vec<ScenarioQuestion>,
    /// Makes `GetPackages` fail with this message.
    #[serde(default)]
    pub prepare_error: Option<String>,
    #[serde(default)]
    pub prepare_error_details: Vec<String>,
    /// Makes the commit fail with this message once downloads are done.
    #[serde(default)]
    pub commit_error: Option<String>,
    #[serde(default)]
    pub commit_error_details: Vec<String>,
}

impl Scenario {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("failed parsing scenario")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading scenario: {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid scenario: {}", path.display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncOutcome {
    #[default]
    Updated,
    UpToDate,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDatabase {
    pub name: String,
    #[serde(default)]
    pub outcome: SyncOutcome,
    #[serde(default)]
    pub error: Option<String>,
    /// With `outcome = "fail"`, succeed after this many failed attempts.
    #[serde(default)]
    pub fail_times: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioPackage {
    #[serde(flatten)]
    pub change: PackageChange,
    #[serde(default)]
    pub optdeps: Vec<String>,
    #[serde(default)]
    pub scriptlet: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioStage {
    #[default]
    Prepare,
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioQuestion {
    #[serde(default)]
    pub stage: ScenarioStage,
    pub question: Question,
    /// A negative answer aborts the method with this question's prompt.
    #[serde(default)]
    pub decline_aborts: bool,
}

#[derive(Debug, Clone)]
pub struct ScenarioFactory {
    scenario: Scenario,
}

impl ScenarioFactory {
    pub fn new(scenario: Scenario) -> Self {
        Self { scenario }
    }
}

impl EngineFactory for ScenarioFactory {
    type Engine = ScenarioEngine;

    fn open(&self, config: &AlpmConfig) -> Result<ScenarioEngine, EngineError> {
        Ok(ScenarioEngine::new(self.scenario.clone(), config.clone()))
    }
}

#[derive(Debug)]
struct SyncState {
    config: DatabaseConfig,
    attempts: u32,
    synced: bool,
}

/// Engine that plays a [`Scenario`] back through the callbacks.
#[derive(Debug)]
pub struct ScenarioEngine {
    scenario: Scenario,
    config: AlpmConfig,
    order: Vec<String>,
    registered: BTreeMap<String, SyncState>,
    transaction: Option<Vec<ScenarioPackage>>,
}

impl ScenarioEngine {
    pub fn new(scenario: Scenario, config: AlpmConfig) -> Self {
        Self {
            scenario,
            config,
            order: Vec::new(),
            registered: BTreeMap::new(),
            transaction: None,
        }
    }

    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn ask_stage(
        &self,
        stage: ScenarioStage,
        callbacks: &mut dyn EngineCallbacks,
    ) -> Result<(), EngineError> {
        for entry in self.scenario.questions.iter().filter(|q| q.stage == stage) {
            let answer = callbacks.ask(entry.question.clone());
            debug!(kind = ?entry.question.kind(), answer, "question answered");
            if entry.decline_aborts && answer == ANSWER_NO {
                return Err(EngineError::with_details(
                    "failed to prepare transaction",
                    vec![entry.question.prompt()],
                ));
            }
        }
        Ok(())
    }

    fn stage_progress(
        callbacks: &mut dyn EngineCallbacks,
        start: EventKind,
        done: EventKind,
        kind: ProgressKind,
        targets: &[ScenarioPackage],
    ) {
        callbacks.notify(EngineEvent::Event(start));
        let total = targets.len() as u32;
        for (index, target) in targets.iter().enumerate() {
            let current = index as u32 + 1;
            callbacks.notify(EngineEvent::Progress(Progress {
                kind,
                package: target.change.name.clone(),
                percent: ((current * 100) / total.max(1)) as u8,
                total,
                current,
            }));
        }
        callbacks.notify(EngineEvent::Event(done));
    }

    fn download(&self, targets: &[ScenarioPackage], callbacks: &mut dyn EngineCallbacks) {
        let downloads: Vec<&ScenarioPackage> = targets
            .iter()
            .filter(|target| target.change.dl_size > 0)
            .collect();
        if downloads.is_empty() {
            return;
        }

        let total: u64 = downloads.iter().map(|target| target.change.dl_size).sum();
        callbacks.notify(EngineEvent::TotalDownload(total));
        callbacks.notify(EngineEvent::Event(EventKind::RetrieveStart));

        let mut last_repo: Option<&str> = None;
        for target in downloads {
            let repo = target.change.repo.as_deref().unwrap_or("local");
            if last_repo != Some(repo) {
                callbacks.notify(EngineEvent::RetrievingPkgs {
                    repo: repo.to_string(),
                });
                last_repo = Some(repo);
            }
            let Some(stem) = target.change.file_stem() else {
                continue;
            };
            let file = format!("{stem}-{}.pkg.tar.zst", self.config.arch);
            let size = target.change.dl_size;
            for chunk in 0..=DOWNLOAD_CHUNKS {
                callbacks.notify(EngineEvent::Downloading {
                    file: file.clone(),
                    transferred: size * chunk / DOWNLOAD_CHUNKS,
                    total: size,
                });
            }
        }
        callbacks.notify(EngineEvent::Event(EventKind::RetrieveDone));
    }

    fn apply(
        target: &ScenarioPackage,
        index: usize,
        total: usize,
        callbacks: &mut dyn EngineCallbacks,
    ) {
        let change = &target.change;
        let kind = match change.kind() {
            ChangeKind::Install => ProgressKind::AddStart,
            ChangeKind::Upgrade => ProgressKind::UpgradeStart,
            ChangeKind::Reinstall => ProgressKind::ReinstallStart,
            ChangeKind::Downgrade => ProgressKind::DowngradeStart,
            ChangeKind::Remove => ProgressKind::RemoveStart,
        };
        for percent in [0, 50, 100] {
            callbacks.notify(EngineEvent::Progress(Progress {
                kind,
                package: change.name.clone(),
                percent,
                total: total as u32,
                current: index as u32 + 1,
            }));
        }
        if let Some(output) = &target.scriptlet {
            callbacks.notify(EngineEvent::Scriptlet(output.clone()));
        }

        let old_version = change.old_version.clone().unwrap_or_default();
        let new_version = change.new_version.clone().unwrap_or_default();
        let event = match change.kind() {
            ChangeKind::Install => PackageEvent::Installed {
                package: change.name.clone(),
                version: new_version,
                optdeps: target.optdeps.clone(),
            },
            ChangeKind::Remove => PackageEvent::Removed {
                package: change.name.clone(),
                version: old_version,
            },
            ChangeKind::Downgrade => PackageEvent::Downgraded {
                package: change.name.clone(),
                old_version,
                new_version,
                optdeps: target.optdeps.clone(),
            },
            ChangeKind::Upgrade | ChangeKind::Reinstall => PackageEvent::Upgraded {
                package: change.name.clone(),
                old_version,
                new_version,
                optdeps: target.optdeps.clone(),
            },
        };
        callbacks.notify(EngineEvent::Package(event));
    }
}

impl PackageEngine for ScenarioEngine {
    fn register_db(&mut self, database: &DatabaseConfig) -> Result<(), EngineError> {
        if self.registered.contains_key(&database.name) {
            return Err(EngineError::transaction(format!(
                "database {} is already registered",
                database.name
            )));
        }
        self.order.push(database.name.clone());
        self.registered.insert(
            database.name.clone(),
            SyncState {
                config: database.clone(),
                attempts: 0,
                synced: false,
            },
        );
        Ok(())
    }

    fn databases(&self) -> Vec<String> {
        self.order.clone()
    }

    fn update_db(
        &mut self,
        name: &str,
        callbacks: &mut dyn EngineCallbacks,
    ) -> Result<DbUpdate, EngineError> {
        let state = self
            .registered
            .get_mut(name)
            .ok_or_else(|| EngineError::transaction(format!("database {name} is not registered")))?;
        state.attempts += 1;
        let server = state.config.servers.first().cloned().unwrap_or_default();

        let Some(remote) = self.scenario.databases.iter().find(|db| db.name == name) else {
            return Err(EngineError::io(format!(
                "failed retrieving file '{name}.db' from {server}: not found"
            )));
        };

        let fails = match (remote.outcome, remote.fail_times) {
            (SyncOutcome::Fail, Some(times)) => state.attempts <= times,
            (SyncOutcome::Fail, None) => true,
            _ => false,
        };
        if fails {
            let reason = remote
                .error
                .clone()
                .unwrap_or_else(|| "could not resolve host".to_string());
            callbacks.notify(EngineEvent::Log {
                level: LogLevel::Error,
                text: format!("failed retrieving file '{name}.db' from {server}: {reason}"),
            });
            return Err(EngineError::io(format!("failed to update {name} ({reason})")));
        }

        let up_to_date = remote.outcome == SyncOutcome::UpToDate || state.synced;
        state.synced = true;
        if up_to_date {
            return Ok(DbUpdate::UpToDate);
        }

        let file = format!("{name}.db");
        callbacks.notify(EngineEvent::Downloading {
            file: file.clone(),
            transferred: 0,
            total: 0,
        });
        callbacks.notify(EngineEvent::Downloading {
            file,
            transferred: 1,
            total: 1,
        });
        Ok(DbUpdate::Updated)
    }

    fn prepare_sysupgrade(
        &mut self,
        callbacks: &mut dyn EngineCallbacks,
    ) -> Result<Vec<PackageChange>, EngineError> {
        callbacks.notify(EngineEvent::Event(EventKind::CheckDepsStart));

        let mut targets = Vec::new();
        for package in &self.scenario.packages {
            let change = &package.change;
            if self.config.ignorepkgs.contains(&change.name) && change.old_version.is_some() {
                callbacks.notify(EngineEvent::Log {
                    level: LogLevel::Warning,
                    text: format!(
                        "{}: ignoring package upgrade ({} => {})",
                        change.name,
                        change.old_version.as_deref().unwrap_or_default(),
                        change.new_version.as_deref().unwrap_or_default()
                    ),
                });
                continue;
            }
            targets.push(package.clone());
        }

        callbacks.notify(EngineEvent::Event(EventKind::ResolveDepsStart));
        self.ask_stage(ScenarioStage::Prepare, callbacks)?;
        callbacks.notify(EngineEvent::Event(EventKind::ResolveDepsDone));
        callbacks.notify(EngineEvent::Event(EventKind::InterConflictsStart));
        callbacks.notify(EngineEvent::Event(EventKind::InterConflictsDone));

        if let Some(message) = &self.scenario.prepare_error {
            return Err(EngineError::with_details(
                message.clone(),
                self.scenario.prepare_error_details.clone(),
            ));
        }
        callbacks.notify(EngineEvent::Event(EventKind::CheckDepsDone));

        let changes = targets.iter().map(|target| target.change.clone()).collect();
        self.transaction = Some(targets);
        Ok(changes)
    }

    fn commit(&mut self, callbacks: &mut dyn EngineCallbacks) -> Result<(), EngineError> {
        let targets = self
            .transaction
            .clone()
            .ok_or_else(|| EngineError::transaction("no transaction is prepared"))?;

        self.download(&targets, callbacks);
        Self::stage_progress(
            callbacks,
            EventKind::IntegrityStart,
            EventKind::IntegrityDone,
            ProgressKind::IntegrityStart,
            &targets,
        );
        Self::stage_progress(
            callbacks,
            EventKind::LoadStart,
            EventKind::LoadDone,
            ProgressKind::LoadStart,
            &targets,
        );
        Self::stage_progress(
            callbacks,
            EventKind::FileConflictsStart,
            EventKind::FileConflictsDone,
            ProgressKind::ConflictsStart,
            &targets,
        );
        Self::stage_progress(
            callbacks,
            EventKind::DiskspaceStart,
            EventKind::DiskspaceDone,
            ProgressKind::DiskspaceStart,
            &targets,
        );

        if let Some(message) = &self.scenario.commit_error {
            return Err(EngineError::with_details(
                message.clone(),
                self.scenario.commit_error_details.clone(),
            ));
        }
        self.ask_stage(ScenarioStage::Commit, callbacks)?;

        callbacks.notify(EngineEvent::Event(EventKind::TransactionStart));
        for (index, target) in targets.iter().enumerate() {
            Self::apply(target, index, targets.len(), callbacks);
        }
        callbacks.notify(EngineEvent::Event(EventKind::TransactionDone));

        self.scenario.packages.clear();
        Ok(())
    }

    fn release(&mut self) -> Result<(), EngineError> {
        self.transaction = None;
        Ok(())
    }
}
