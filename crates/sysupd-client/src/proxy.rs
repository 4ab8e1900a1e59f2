use std::collections::BTreeMap;

use sysupd_core::{
    AnswerCode, CallError, Caller, ClientLink, Inbound, Method, MethodCall, PackageChange,
    Signal, SignalEnvelope,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::handler::SignalHandler;

/// Result of a completed method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutput {
    Done,
    Packages(Vec<PackageChange>),
}

impl CallOutput {
    pub fn into_packages(self) -> Vec<PackageChange> {
        match self {
            Self::Done => Vec::new(),
            Self::Packages(packages) => packages,
        }
    }
}

type Completion = Option<Result<CallOutput, ProxyError>>;

/// An acknowledged call whose completion has not been collected yet.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pending call completes only through Proxy::wait"]
pub struct PendingCall {
    pub(crate) method: Method,
}

impl PendingCall {
    pub fn method(&self) -> Method {
        self.method
    }
}

/// Caller side of a session.
///
/// Calls are split in two: [`Proxy::call`] returns once the worker has
/// acknowledged the call, [`Proxy::wait`] drives the signal stream until its
/// completion signal arrives.
pub struct Proxy {
    caller: Caller,
    requests: mpsc::Sender<Inbound>,
    signals: mpsc::UnboundedReceiver<SignalEnvelope>,
    calls: BTreeMap<Method, Completion>,
}

impl Proxy {
    pub fn new(caller: Caller, link: ClientLink) -> Self {
        Self {
            caller,
            requests: link.requests,
            signals: link.signals,
            calls: BTreeMap::new(),
        }
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    /// The `Init` call registering this proxy as the signal destination.
    pub fn init_call(&self) -> MethodCall {
        MethodCall::Init {
            sender: self.caller.name.clone(),
        }
    }

    pub fn is_pending(&self, method: Method) -> bool {
        self.calls.contains_key(&method)
    }

    pub async fn call(&mut self, call: MethodCall) -> Result<PendingCall, ProxyError> {
        let method = call.method();
        if self.is_pending(method) {
            return Err(CallError::ConcurrentCall(method).into());
        }

        let (reply, ack) = oneshot::channel();
        self.requests
            .send(Inbound::Call {
                caller: self.caller.clone(),
                call,
                reply,
            })
            .await
            .map_err(|_| ProxyError::Disconnected)?;
        ack.await.map_err(|_| ProxyError::Disconnected)??;

        debug!(%method, "call acknowledged");
        self.calls.insert(method, None);
        Ok(PendingCall { method })
    }

    pub async fn wait<H>(
        &mut self,
        pending: PendingCall,
        handler: &mut H,
    ) -> Result<CallOutput, ProxyError>
    where
        H: SignalHandler + ?Sized,
    {
        let method = pending.method;
        loop {
            match self.calls.get(&method) {
                None => return Err(ProxyError::NotCalled(method)),
                Some(Some(_)) => {
                    let completion = self.calls.remove(&method).flatten();
                    return completion.unwrap_or(Err(ProxyError::NotCalled(method)));
                }
                Some(None) => {}
            }

            let Some(envelope) = self.signals.recv().await else {
                self.calls.clear();
                return Err(ProxyError::Disconnected);
            };
            self.dispatch(envelope, handler).await;
        }
    }

    /// Calls and waits for completion.
    pub async fn invoke<H>(
        &mut self,
        call: MethodCall,
        handler: &mut H,
    ) -> Result<CallOutput, ProxyError>
    where
        H: SignalHandler + ?Sized,
    {
        let pending = self.call(call).await?;
        self.wait(pending, handler).await
    }

    /// Tells the worker this session is gone.
    pub async fn disconnect(self) {
        let _ = self
            .requests
            .send(Inbound::Disconnected {
                caller: self.caller,
            })
            .await;
    }

    async fn dispatch<H>(&mut self, envelope: SignalEnvelope, handler: &mut H)
    where
        H: SignalHandler + ?Sized,
    {
        if envelope.destination != self.caller.name {
            warn!(destination = %envelope.destination, "ignoring signal for another session");
            return;
        }

        match envelope.signal {
            Signal::MethodFinished { method } => self.complete(method, Ok(CallOutput::Done)),
            Signal::MethodFailed { method, message } => {
                self.complete(method, Err(ProxyError::MethodFailed { method, message }));
            }
            Signal::GetPackagesFinished(packages) => {
                self.complete(Method::GetPackages, Ok(CallOutput::Packages(packages)));
            }
            Signal::SyncDbsCount(count) => handler.sync_dbs_count(count).await,
            Signal::SyncDbStart(name) => handler.sync_db_start(&name).await,
            Signal::SyncDbEnd(result) => handler.sync_db_end(result).await,
            Signal::Engine(event) => handler.engine_event(&event).await,
            Signal::Question(question) => {
                let code = handler.answer(&question).await;
                if let Err(err) = self.answer(code).await {
                    warn!(kind = ?question.kind(), error = %err, "answer rejected");
                }
            }
        }
    }

    async fn answer(&self, code: AnswerCode) -> Result<(), ProxyError> {
        let (reply, ack) = oneshot::channel();
        self.requests
            .send(Inbound::Answer {
                caller: self.caller.clone(),
                code,
                reply,
            })
            .await
            .map_err(|_| ProxyError::Disconnected)?;
        ack.await.map_err(|_| ProxyError::Disconnected)??;
        Ok(())
    }

    fn complete(&mut self, method: Method, result: Result<CallOutput, ProxyError>) {
        match self.calls.get_mut(&method) {
            Some(slot) if slot.is_none() => *slot = Some(result),
            _ => warn!(%method, "completion for a call that is not pending"),
        }
    }
}
