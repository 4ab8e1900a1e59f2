use std::future::Future;

use async_trait::async_trait;
use sysupd_client::{CallOutput, NullHandler, Proxy, ProxyError, SignalHandler};
use sysupd_core::{
    AnswerCode, EngineEvent, LogLevel, MethodCall, Question, SyncDbResult, TransactionStep,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::progress::{ProgressTracker, Stage};
use crate::request::UpgradeRequest;
use crate::state::UpgradeState;
use crate::summary::TransactionSummary;
use crate::ui::{MessageLevel, UpgradeUi};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("failed to connect to the worker: {0:#}")]
    Connect(anyhow::Error),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error("invalid state transition from {from} to {to}")]
    Transition { from: UpgradeState, to: UpgradeState },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Upgraded(TransactionSummary),
    Declined,
    UpToDate,
}

/// Drives one upgrade run over a proxy and feeds the UI.
pub struct Orchestrator<U> {
    request: UpgradeRequest,
    ui: U,
    state: UpgradeState,
    tracker: ProgressTracker,
}

impl<U: UpgradeUi> Orchestrator<U> {
    pub fn new(request: UpgradeRequest, ui: U) -> Self {
        Self {
            request,
            ui,
            state: UpgradeState::Idle,
            tracker: ProgressTracker::new(),
        }
    }

    pub fn state(&self) -> UpgradeState {
        self.state
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn into_ui(self) -> U {
        self.ui
    }

    /// Runs the whole flow. The worker is always sent `FreeAlpm` at the end,
    /// including after a failure, so it can exit.
    pub async fn run<F, Fut>(&mut self, connect: F) -> Result<RunOutcome, FlowError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Proxy>>,
    {
        self.tracker = ProgressTracker::new();
        self.transition(UpgradeState::Connecting)?;
        self.report_progress();

        let mut proxy = match connect().await {
            Ok(proxy) => proxy,
            Err(err) => {
                let err = FlowError::Connect(err);
                self.abort(&err);
                return Err(err);
            }
        };
        self.tracker.set_fraction(1.0);
        self.report_progress();

        let result = self.drive(&mut proxy).await;
        if let Err(err) = &result {
            self.abort(err);
        }
        self.release(&mut proxy).await;
        result
    }

    async fn drive(&mut self, proxy: &mut Proxy) -> Result<RunOutcome, FlowError> {
        self.transition(UpgradeState::Initializing)?;
        self.tracker.enter(Stage::Init);
        let init = proxy.init_call();
        self.invoke(proxy, init).await?;
        let alpm = Box::new(self.request.alpm.clone());
        self.invoke(proxy, MethodCall::InitAlpm(alpm)).await?;
        self.tracker.set_fraction(1.0);
        self.report_progress();

        // One AddDb at a time: the worker runs at most one call per method.
        let databases = self.request.databases.clone();
        let total = databases.len();
        for (index, database) in databases.into_iter().enumerate() {
            self.transition(UpgradeState::RegisteringDbs { index, total })?;
            let name = database.name.clone();
            self.invoke(proxy, MethodCall::AddDb(database)).await?;
            debug!(database = %name, "database registered");
            self.tracker.register_progress(index + 1, total);
            self.report_progress();
        }

        self.transition(UpgradeState::SyncingDbs)?;
        self.tracker.enter(Stage::Sync);
        self.invoke(proxy, MethodCall::SyncDbs).await?;
        self.tracker.set_fraction(1.0);
        self.report_progress();

        self.transition(UpgradeState::FetchingPackageList)?;
        self.tracker.enter(Stage::FetchList);
        let packages = self
            .invoke(proxy, MethodCall::GetPackages)
            .await?
            .into_packages();
        self.tracker.set_fraction(1.0);
        if packages.is_empty() {
            info!("system is up to date");
            self.transition(UpgradeState::Done)?;
            self.tracker.finish();
            self.report_progress();
            return Ok(RunOutcome::UpToDate);
        }

        self.tracker.set_packages(&packages);
        self.report_progress();
        for row in self.tracker.rows() {
            self.ui.package_row(row);
        }
        let summary = TransactionSummary::from_changes(&packages);

        self.transition(UpgradeState::WaitingForConfirmation)?;
        if !self.ui.confirm(&summary, &packages).await {
            info!("upgrade declined");
            self.transition(UpgradeState::Declined)?;
            self.invoke(proxy, MethodCall::NoSysUpgrade).await?;
            self.tracker.set_step(TransactionStep::None);
            self.transition(UpgradeState::Idle)?;
            return Ok(RunOutcome::Declined);
        }

        self.transition(UpgradeState::Confirmed)?;
        self.tracker.set_step(TransactionStep::Confirmed);
        self.transition(UpgradeState::Committing)?;
        self.invoke(proxy, MethodCall::SysUpgrade).await?;
        self.tracker.finish();
        self.report_progress();
        self.transition(UpgradeState::Done)?;
        info!(packages = summary.total(), "upgrade committed");
        Ok(RunOutcome::Upgraded(summary))
    }

    async fn invoke(
        &mut self,
        proxy: &mut Proxy,
        call: MethodCall,
    ) -> Result<CallOutput, ProxyError> {
        let mut monitor = Monitor {
            tracker: &mut self.tracker,
            ui: &mut self.ui,
            syncing: None,
        };
        proxy.invoke(call, &mut monitor).await
    }

    async fn release(&mut self, proxy: &mut Proxy) {
        match proxy.invoke(MethodCall::FreeAlpm, &mut NullHandler).await {
            Ok(_) => debug!("worker released"),
            Err(err) => debug!(error = %err, "failed to release worker"),
        }
    }

    fn transition(&mut self, next: UpgradeState) -> Result<(), FlowError> {
        if !self.state.can_transition_to(&next) {
            return Err(FlowError::Transition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = %self.state, to = %next, "state change");
        self.state = next;
        self.ui.state_changed(&self.state);
        Ok(())
    }

    fn abort(&mut self, err: &FlowError) {
        error!(state = %self.state, error = %err, "upgrade failed");
        self.ui.error(&err.to_string());
        self.tracker.set_step(TransactionStep::None);
        self.state = UpgradeState::Idle;
        self.ui.state_changed(&self.state);
    }

    fn report_progress(&mut self) {
        let fraction = self.tracker.global();
        self.ui.progress(fraction, self.tracker.step());
    }
}

/// Signal handler for the duration of one call.
struct Monitor<'a, U> {
    tracker: &'a mut ProgressTracker,
    ui: &'a mut U,
    /// Databases synchronize one after another.
    syncing: Option<String>,
}

impl<'a, U: UpgradeUi> Monitor<'a, U> {
    fn report(&mut self) {
        let fraction = self.tracker.global();
        self.ui.progress(fraction, self.tracker.step());
    }

    fn log(&mut self, level: LogLevel, text: &str) {
        let text = text.trim_end();
        match level {
            LogLevel::Error => {
                error!(target: "sysupd::engine", "{text}");
                self.ui.message(MessageLevel::Error, text);
            }
            LogLevel::Warning => {
                warn!(target: "sysupd::engine", "{text}");
                self.ui.message(MessageLevel::Warning, text);
            }
            LogLevel::Debug | LogLevel::Function => {
                debug!(target: "sysupd::engine", "{text}");
            }
        }
    }
}

#[async_trait]
impl<'a, U: UpgradeUi> SignalHandler for Monitor<'a, U> {
    async fn sync_dbs_count(&mut self, count: u32) {
        self.tracker.sync_count(count);
        self.report();
    }

    async fn sync_db_start(&mut self, name: &str) {
        self.syncing = Some(name.to_string());
        self.ui.database(name, None);
    }

    async fn sync_db_end(&mut self, result: SyncDbResult) {
        self.tracker.sync_db_end();
        self.report();
        let name = self.syncing.take().unwrap_or_default();
        if result == SyncDbResult::Failure {
            warn!(database = %name, "database failed to synchronize");
        }
        self.ui.database(&name, Some(result));
    }

    async fn engine_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Debug(text) => debug!(target: "sysupd::engine", "{}", text.trim_end()),
            EngineEvent::Log { level, text } => self.log(*level, text),
            EngineEvent::Event(kind) => {
                info!(target: "sysupd::engine", "{}", kind.describe());
            }
            EngineEvent::Package(package) => {
                self.ui.message(MessageLevel::Info, &package.describe());
                for optdep in package.optdeps() {
                    self.ui.message(
                        MessageLevel::Info,
                        &format!("new optional dependency for {}: {optdep}", package.package()),
                    );
                }
            }
            EngineEvent::RetrievingPkgs { repo } => {
                self.ui
                    .message(MessageLevel::Info, &format!("retrieving packages from {repo}"));
            }
            EngineEvent::Scriptlet(text) => {
                self.ui.message(MessageLevel::Info, text.trim_end());
            }
            EngineEvent::DeltaGenerating { delta, dest } => {
                self.ui.message(
                    MessageLevel::Info,
                    &format!("generating {dest} with {delta}"),
                );
            }
            EngineEvent::TotalDownload(_)
            | EngineEvent::Downloading { .. }
            | EngineEvent::Progress(_) => {}
        }

        if let Some(row) = self.tracker.apply(event) {
            self.ui.package_row(&row);
        }
        self.report();
    }

    async fn answer(&mut self, question: &Question) -> AnswerCode {
        let code = self.ui.answer(question).await;
        info!(kind = ?question.kind(), code, "question answered");
        code
    }
}
