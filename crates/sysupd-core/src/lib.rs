mod config;
mod error;
mod link;
mod method;
mod package;
mod question;
mod signal;
mod step;
pub mod wire;

pub use config::{AlpmConfig, DatabaseConfig, DeltaRatio, SigLevel};
pub use error::{CallError, EngineError};
pub use link::{link, Caller, ClientLink, Inbound, Responder, WorkerLink};
pub use method::{Method, MethodCall};
pub use package::{vercmp, ChangeKind, PackageChange};
pub use question::{AnswerCode, Provider, Question, QuestionKind, ANSWER_NO, ANSWER_YES};
pub use signal::{
    EngineEvent, EventKind, LogLevel, PackageEvent, Progress, ProgressKind, Signal,
    SignalEnvelope, SyncDbResult,
};
pub use step::TransactionStep;

/// Capability the privilege broker is asked about when a session binds.
pub const SYSUPGRADE_ACTION: &str = "org.sysupd.sysupgrade";

#[cfg(test)]
mod tests;
