use sysupd_core::{
    AlpmConfig, AnswerCode, DatabaseConfig, EngineError, EngineEvent, PackageChange, Question,
};

/// What the engine calls back into while a method is executing.
pub trait EngineCallbacks {
    fn notify(&mut self, event: EngineEvent);

    /// Blocks until the session answers, then returns the answer code.
    fn ask(&mut self, question: Question) -> AnswerCode;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbUpdate {
    Updated,
    UpToDate,
}

/// The package-manager engine handle owned by the worker.
pub trait PackageEngine {
    fn register_db(&mut self, database: &DatabaseConfig) -> Result<(), EngineError>;

    /// Registered sync databases, in registration order.
    fn databases(&self) -> Vec<String>;

    fn update_db(
        &mut self,
        name: &str,
        callbacks: &mut dyn EngineCallbacks,
    ) -> Result<DbUpdate, EngineError>;

    /// Computes the system upgrade and leaves the transaction prepared.
    fn prepare_sysupgrade(
        &mut self,
        callbacks: &mut dyn EngineCallbacks,
    ) -> Result<Vec<PackageChange>, EngineError>;

    fn commit(&mut self, callbacks: &mut dyn EngineCallbacks) -> Result<(), EngineError>;

    /// Drops the prepared transaction, if any.
    fn release(&mut self) -> Result<(), EngineError>;
}

pub trait EngineFactory {
    type Engine: PackageEngine;

    fn open(&self, config: &AlpmConfig) -> Result<Self::Engine, EngineError>;
}
