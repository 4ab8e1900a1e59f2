use sysupd_core::{CallError, Method};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    /// The worker refused the call outright.
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("{method} failed: {message}")]
    MethodFailed { method: Method, message: String },
    #[error("{0} was not called")]
    NotCalled(Method),
    #[error("lost connection to the worker")]
    Disconnected,
}
