use async_trait::async_trait;
use sysupd_core::{AnswerCode, PackageChange, Question, SyncDbResult, TransactionStep};

use crate::progress::PackageRow;
use crate::state::UpgradeState;
use crate::summary::TransactionSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// Everything the orchestrator needs from whoever presents the upgrade.
#[async_trait]
pub trait UpgradeUi: Send {
    fn state_changed(&mut self, _state: &UpgradeState) {}

    /// Aggregate progress in `0.0..=1.0`; never decreases within a run.
    fn progress(&mut self, _fraction: f64, _step: TransactionStep) {}

    fn package_row(&mut self, _row: &PackageRow) {}

    /// `result` is `None` when the database starts synchronizing.
    fn database(&mut self, _name: &str, _result: Option<SyncDbResult>) {}

    fn message(&mut self, _level: MessageLevel, _text: &str) {}

    /// Asks whether to commit the prepared transaction.
    async fn confirm(&mut self, summary: &TransactionSummary, packages: &[PackageChange])
        -> bool;

    async fn answer(&mut self, question: &Question) -> AnswerCode;

    fn error(&mut self, _message: &str) {}
}
