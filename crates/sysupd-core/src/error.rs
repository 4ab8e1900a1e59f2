use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::method::Method;

/// Synchronous rejection of a call, returned in place of the acknowledgement.
///
/// None of these produce a `MethodFailed` signal.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CallError {
    #[error("session error: {0}")]
    Session(String),
    #[error("method {0} is already running")]
    ConcurrentCall(Method),
    #[error("no question is pending")]
    NoPendingQuestion,
    #[error("worker is not reachable")]
    Disconnected,
}

impl CallError {
    pub fn is_session(&self) -> bool {
        matches!(self, Self::Session(_))
    }
}

/// Failure reported by the package-manager engine.
///
/// Both variants are recoverable: the worker releases the transaction and
/// reports the rendered text through `MethodFailed`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum EngineError {
    #[error("{}", render_detail(.message, .details))]
    Transaction {
        message: String,
        details: Vec<String>,
    },
    #[error("{0}")]
    Io(String),
}

impl EngineError {
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(message: impl Into<String>, details: Vec<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            details,
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }
}

fn render_detail(message: &str, details: &[String]) -> String {
    if details.is_empty() {
        return message.to_string();
    }
    let mut rendered = format!("{message}:");
    for detail in details {
        rendered.push_str("\n- ");
        rendered.push_str(detail);
    }
    rendered
}
