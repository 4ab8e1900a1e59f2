use async_trait::async_trait;
use sysupd_core::{AnswerCode, EngineEvent, Question, SyncDbResult};

/// Receives the data signals of a session while a call is awaited.
///
/// Completion signals are consumed by the proxy itself.
#[async_trait]
pub trait SignalHandler: Send {
    async fn sync_dbs_count(&mut self, _count: u32) {}

    async fn sync_db_start(&mut self, _name: &str) {}

    async fn sync_db_end(&mut self, _result: SyncDbResult) {}

    async fn engine_event(&mut self, _event: &EngineEvent) {}

    /// Decides a question raised mid-method. Defaults to the question's own
    /// default answer.
    async fn answer(&mut self, question: &Question) -> AnswerCode {
        question.default_answer()
    }
}

/// Ignores every signal and answers with defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHandler;

impl SignalHandler for NullHandler {}
