use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::CallError;
use crate::method::MethodCall;
use crate::question::AnswerCode;
use crate::signal::SignalEnvelope;

/// Identity of the peer issuing a call, as established by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller {
    pub name: String,
    pub uid: Option<u32>,
}

impl Caller {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: None,
        }
    }

    pub fn with_uid(name: impl Into<String>, uid: u32) -> Self {
        Self {
            name: name.into(),
            uid: Some(uid),
        }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.uid {
            Some(uid) => write!(f, "{} (uid {uid})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Synchronous acknowledgement of a call or answer.
pub type Responder = oneshot::Sender<Result<(), CallError>>;

#[derive(Debug)]
pub enum Inbound {
    Call {
        caller: Caller,
        call: MethodCall,
        reply: Responder,
    },
    Answer {
        caller: Caller,
        code: AnswerCode,
        reply: Responder,
    },
    Disconnected {
        caller: Caller,
    },
}

impl Inbound {
    pub fn caller(&self) -> &Caller {
        match self {
            Self::Call { caller, .. }
            | Self::Answer { caller, .. }
            | Self::Disconnected { caller } => caller,
        }
    }
}

/// The worker's end: requests in, signals out.
#[derive(Debug)]
pub struct WorkerLink {
    pub inbox: mpsc::Receiver<Inbound>,
    pub signals: mpsc::UnboundedSender<SignalEnvelope>,
}

/// The caller's end: requests out, signals in.
#[derive(Debug)]
pub struct ClientLink {
    pub requests: mpsc::Sender<Inbound>,
    pub signals: mpsc::UnboundedReceiver<SignalEnvelope>,
}

pub fn link(capacity: usize) -> (WorkerLink, ClientLink) {
    let (request_tx, request_rx) = mpsc::channel(capacity.max(1));
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    (
        WorkerLink {
            inbox: request_rx,
            signals: signal_tx,
        },
        ClientLink {
            requests: request_tx,
            signals: signal_rx,
        },
    )
}
