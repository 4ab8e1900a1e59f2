mod broker;
mod calls;
mod engine;
mod question;
mod scenario;
mod service;
mod session;
pub mod socket;

pub use broker::{AllowListBroker, PrivilegeBroker, SameProcessBroker};
pub use calls::CallTable;
pub use engine::{DbUpdate, EngineCallbacks, EngineFactory, PackageEngine};
pub use question::{QuestionSlot, QuestionState};
pub use scenario::{
    Scenario, ScenarioDatabase, ScenarioEngine, ScenarioFactory, ScenarioPackage,
    ScenarioQuestion, ScenarioStage, SyncOutcome,
};
pub use service::{Worker, WorkerError, WorkerExit};
pub use session::{Session, SessionSlot};

#[cfg(test)]
mod tests;
