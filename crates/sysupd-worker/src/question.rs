use std::collections::VecDeque;

use sysupd_core::{
    AnswerCode, CallError, EngineEvent, Inbound, Method, Question, QuestionKind, Signal,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::calls::CallTable;
use crate::engine::EngineCallbacks;
use crate::service::SignalSink;
use crate::session::SessionSlot;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QuestionState {
    #[default]
    Free,
    Waiting(Question),
    Answered(QuestionKind, AnswerCode),
}

/// At most one question is pending at any time.
#[derive(Debug, Default)]
pub struct QuestionSlot {
    state: QuestionState,
}

impl QuestionSlot {
    pub fn state(&self) -> &QuestionState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state != QuestionState::Free
    }

    /// Claims the slot for `question`; fails with the kind already pending.
    pub fn raise(&mut self, question: Question) -> Result<(), QuestionKind> {
        match &self.state {
            QuestionState::Free => {
                self.state = QuestionState::Waiting(question);
                Ok(())
            }
            QuestionState::Waiting(pending) => Err(pending.kind()),
            QuestionState::Answered(kind, _) => Err(*kind),
        }
    }

    /// Records the answer for the waiting question.
    pub fn answer(&mut self, code: AnswerCode) -> Result<(), CallError> {
        let QuestionState::Waiting(question) = &self.state else {
            return Err(CallError::NoPendingQuestion);
        };
        let code = if question.accepts(code) {
            code
        } else {
            warn!(
                kind = ?question.kind(),
                code,
                "answer out of range, using the default"
            );
            question.default_answer()
        };
        self.state = QuestionState::Answered(question.kind(), code);
        Ok(())
    }

    /// Consumes a recorded answer and frees the slot.
    pub fn take_answer(&mut self) -> Option<AnswerCode> {
        match std::mem::take(&mut self.state) {
            QuestionState::Answered(_, code) => Some(code),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Frees the slot without an answer; returns the question's default.
    pub fn abandon(&mut self) -> Option<AnswerCode> {
        match std::mem::take(&mut self.state) {
            QuestionState::Waiting(question) => Some(question.default_answer()),
            QuestionState::Answered(_, code) => Some(code),
            QuestionState::Free => None,
        }
    }
}

/// Engine callbacks for the duration of one method.
///
/// `ask` pumps the inbox only until the bound session answers. Calls that
/// can already be refused (foreign caller, method still running) are rejected
/// on the spot; every other inbound message is parked in `deferred` and
/// handled by the main loop once the question is resolved.
pub(crate) struct QuestionBridge<'a> {
    pub inbox: &'a mut mpsc::Receiver<Inbound>,
    pub deferred: &'a mut VecDeque<Inbound>,
    pub slot: &'a mut QuestionSlot,
    pub session: &'a mut SessionSlot,
    pub calls: &'a CallTable,
    pub sink: &'a SignalSink,
    pub destination: String,
}

impl EngineCallbacks for QuestionBridge<'_> {
    fn notify(&mut self, event: EngineEvent) {
        self.sink.emit(&self.destination, Signal::Engine(event));
    }

    fn ask(&mut self, question: Question) -> AnswerCode {
        let fallback = question.default_answer();
        if !self.session.is_bound() {
            debug!(kind = ?question.kind(), "no session to ask, using the default answer");
            return fallback;
        }
        if let Err(pending) = self.slot.raise(question.clone()) {
            warn!(
                kind = ?question.kind(),
                pending = ?pending,
                "question rejected, another question is pending"
            );
            return fallback;
        }

        info!(kind = ?question.kind(), "waiting for an answer");
        self.sink
            .emit(&self.destination, Signal::Question(question));

        loop {
            let Some(message) = self.inbox.blocking_recv() else {
                warn!("transport closed while a question was pending");
                return self.slot.abandon().unwrap_or(fallback);
            };

            match message {
                Inbound::Answer {
                    caller,
                    code,
                    reply,
                } => {
                    let result = self
                        .session
                        .authorize(&caller)
                        .and_then(|()| self.slot.answer(code));
                    let accepted = result.is_ok();
                    let _ = reply.send(result);
                    if accepted {
                        break;
                    }
                }
                Inbound::Disconnected { caller } if self.session.is_bound_to(&caller) => {
                    warn!(%caller, "session disconnected with a question pending");
                    self.session.close();
                    return self.slot.abandon().unwrap_or(fallback);
                }
                Inbound::Call {
                    caller,
                    call,
                    reply,
                } if call.method() != Method::Init => {
                    let method = call.method();
                    let refused = match self.session.authorize(&caller) {
                        Err(err) => Some(err),
                        Ok(()) if self.calls.is_running(method) => {
                            Some(CallError::ConcurrentCall(method))
                        }
                        Ok(()) => None,
                    };
                    match refused {
                        Some(err) => {
                            debug!(%caller, %method, error = %err, "call rejected while a question is pending");
                            let _ = reply.send(Err(err));
                        }
                        None => {
                            debug!(%caller, %method, "deferring call until the question is answered");
                            self.deferred.push_back(Inbound::Call {
                                caller,
                                call,
                                reply,
                            });
                        }
                    }
                }
                other => {
                    debug!(caller = %other.caller(), "deferring message until the question is answered");
                    self.deferred.push_back(other);
                }
            }
        }

        self.slot.take_answer().unwrap_or(fallback)
    }
}
