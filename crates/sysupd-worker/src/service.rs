use std::collections::VecDeque;

use sysupd_core::{
    CallError, Caller, EngineError, Inbound, Method, MethodCall, PackageChange, Signal,
    SignalEnvelope, SyncDbResult, WorkerLink, SYSUPGRADE_ACTION,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::broker::PrivilegeBroker;
use crate::calls::CallTable;
use crate::engine::{DbUpdate, EngineFactory, PackageEngine};
use crate::question::{QuestionBridge, QuestionSlot};
use crate::session::SessionSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The session called `FreeAlpm`.
    Freed,
    /// The bound session disconnected.
    SessionClosed,
    /// Every sender of the inbox went away.
    TransportClosed,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{caller} is not authorized for {action}")]
    AuthorizationDenied { caller: Caller, action: String },
}

pub(crate) struct SignalSink {
    signals: mpsc::UnboundedSender<SignalEnvelope>,
}

impl SignalSink {
    pub(crate) fn emit(&self, destination: &str, signal: Signal) {
        let envelope = SignalEnvelope {
            destination: destination.to_string(),
            signal,
        };
        if self.signals.send(envelope).is_err() {
            debug!(destination, "dropping signal, nobody is listening");
        }
    }
}

struct Job {
    caller: Caller,
    call: MethodCall,
}

/// The privileged side of the protocol.
///
/// Runs a single loop on the calling thread: each accepted call is
/// acknowledged at once and executed later on the same loop, with its outcome
/// reported as `MethodFinished`/`MethodFailed`.
pub struct Worker<F: EngineFactory, B> {
    factory: F,
    broker: B,
    inbox: mpsc::Receiver<Inbound>,
    sink: SignalSink,
    session: SessionSlot,
    calls: CallTable,
    question: QuestionSlot,
    deferred: VecDeque<Inbound>,
    scheduled: VecDeque<Job>,
    handle: Option<F::Engine>,
    prepared: bool,
    /// `Init` must name the caller itself as the signal destination.
    own_sender_only: bool,
    exit: Option<WorkerExit>,
}

impl<F, B> Worker<F, B>
where
    F: EngineFactory,
    B: PrivilegeBroker,
{
    pub fn new(factory: F, broker: B, link: WorkerLink) -> Self {
        Self {
            factory,
            broker,
            inbox: link.inbox,
            sink: SignalSink {
                signals: link.signals,
            },
            session: SessionSlot::default(),
            calls: CallTable::default(),
            question: QuestionSlot::default(),
            deferred: VecDeque::new(),
            scheduled: VecDeque::new(),
            handle: None,
            prepared: false,
            own_sender_only: false,
            exit: None,
        }
    }

    /// Rejects an `Init` whose sender is not the caller's own name.
    pub fn own_sender_only(mut self) -> Self {
        self.own_sender_only = true;
        self
    }

    /// Runs until the session ends. Blocks the calling thread; must not be
    /// called from inside an async runtime.
    pub fn run(mut self) -> Result<WorkerExit, WorkerError> {
        info!("worker loop started");
        loop {
            if let Some(exit) = self.exit {
                self.shutdown();
                info!(?exit, "worker loop finished");
                return Ok(exit);
            }

            if let Some(job) = self.scheduled.pop_front() {
                self.execute(job)?;
                continue;
            }

            let next = match self.deferred.pop_front() {
                Some(message) => Some(message),
                None => self.inbox.blocking_recv(),
            };
            match next {
                Some(message) => self.accept(message),
                None => self.exit = Some(WorkerExit::TransportClosed),
            }
        }
    }

    fn accept(&mut self, message: Inbound) {
        match message {
            Inbound::Call {
                caller,
                call,
                reply,
            } => {
                let method = call.method();
                let result = self.admit(&caller, &call);
                match &result {
                    Ok(()) => {
                        debug!(%caller, %method, "call accepted");
                        self.scheduled.push_back(Job { caller, call });
                    }
                    Err(err) => debug!(%caller, %method, error = %err, "call rejected"),
                }
                let _ = reply.send(result);
            }
            Inbound::Answer { caller, reply, .. } => {
                let result = self
                    .session
                    .authorize(&caller)
                    .and(Err(CallError::NoPendingQuestion));
                let _ = reply.send(result);
            }
            Inbound::Disconnected { caller } => {
                if self.session.is_bound_to(&caller) {
                    info!(%caller, "session disconnected");
                    self.session.close();
                    self.exit = Some(WorkerExit::SessionClosed);
                } else {
                    debug!(%caller, "ignoring disconnect of an unbound caller");
                }
            }
        }
    }

    fn admit(&mut self, caller: &Caller, call: &MethodCall) -> Result<(), CallError> {
        let method = call.method();
        match call {
            MethodCall::Init { sender } => {
                self.session.check_bindable()?;
                if sender.trim().is_empty() {
                    return Err(CallError::Session(
                        "Init requires a sender name".to_string(),
                    ));
                }
                if self.own_sender_only && *sender != caller.name {
                    return Err(CallError::Session(format!(
                        "Init sender '{sender}' does not match caller '{}'",
                        caller.name
                    )));
                }
            }
            _ => self.session.authorize(caller)?,
        }
        self.calls.start(method)
    }

    fn execute(&mut self, job: Job) -> Result<(), WorkerError> {
        let method = job.call.method();
        if let MethodCall::Init { sender } = job.call {
            return self.execute_init(job.caller, sender);
        }

        let Some(destination) = self.session.destination().map(ToOwned::to_owned) else {
            debug!(%method, "session ended before the call ran");
            self.calls.finish(method);
            return Ok(());
        };

        let outcome = self.run_method(&destination, job.call);
        self.calls.finish(method);
        match outcome {
            Ok(Some(packages)) => {
                self.sink
                    .emit(&destination, Signal::GetPackagesFinished(packages));
            }
            Ok(None) => self.sink.emit(&destination, Signal::finished(method)),
            Err(err) => {
                warn!(%method, error = %err, "method failed");
                self.sink
                    .emit(&destination, Signal::failed(method, err.to_string()));
            }
        }

        if self.session.is_closed() && self.exit.is_none() {
            self.exit = Some(if method == Method::FreeAlpm {
                WorkerExit::Freed
            } else {
                WorkerExit::SessionClosed
            });
        }
        Ok(())
    }

    fn execute_init(&mut self, caller: Caller, sender: String) -> Result<(), WorkerError> {
        let granted = match self.broker.check(&caller, SYSUPGRADE_ACTION) {
            Ok(granted) => granted,
            Err(err) => {
                error!(%caller, error = %err, "privilege broker failed");
                false
            }
        };
        self.calls.finish(Method::Init);

        if !granted {
            error!(%caller, action = SYSUPGRADE_ACTION, "authorization denied");
            self.sink.emit(
                &sender,
                Signal::failed(Method::Init, format!("not authorized for {SYSUPGRADE_ACTION}")),
            );
            self.shutdown();
            return Err(WorkerError::AuthorizationDenied {
                caller,
                action: SYSUPGRADE_ACTION.to_string(),
            });
        }

        match self.session.bind(caller.clone(), sender.clone()) {
            Ok(()) => {
                info!(%caller, destination = %sender, "session bound");
                self.sink.emit(&sender, Signal::finished(Method::Init));
            }
            Err(err) => {
                self.sink
                    .emit(&sender, Signal::failed(Method::Init, err.to_string()));
            }
        }
        Ok(())
    }

    /// Runs one method against the engine. `Some` carries the package list
    /// that completes `GetPackages`.
    fn run_method(
        &mut self,
        destination: &str,
        call: MethodCall,
    ) -> Result<Option<Vec<PackageChange>>, EngineError> {
        let method = call.method();
        if method.needs_handle() && self.handle.is_none() {
            return Err(EngineError::transaction(format!(
                "{method} requires an initialized engine, call InitAlpm first"
            )));
        }

        let Self {
            inbox,
            sink,
            session,
            calls,
            question,
            deferred,
            handle,
            prepared,
            factory,
            ..
        } = self;
        let mut bridge = QuestionBridge {
            inbox,
            deferred,
            slot: question,
            session,
            calls,
            sink,
            destination: destination.to_string(),
        };

        match call {
            MethodCall::Init { .. } => Ok(None),
            MethodCall::InitAlpm(config) => {
                if handle.is_some() {
                    return Err(EngineError::transaction(
                        "the engine is already initialized",
                    ));
                }
                config
                    .validate()
                    .map_err(|err| EngineError::transaction(err.to_string()))?;
                *handle = Some(factory.open(&config)?);
                info!(rootdir = %config.rootdir, dbpath = %config.dbpath, "engine initialized");
                Ok(None)
            }
            MethodCall::AddDb(database) => {
                database
                    .validate()
                    .map_err(|err| EngineError::transaction(err.to_string()))?;
                let engine = engine_mut(handle)?;
                engine.register_db(&database)?;
                info!(name = %database.name, siglevel = %database.siglevel, "database registered");
                Ok(None)
            }
            MethodCall::SyncDbs => {
                let engine = engine_mut(handle)?;
                sync_databases(engine, &mut bridge)?;
                Ok(None)
            }
            MethodCall::GetPackages => {
                if *prepared {
                    return Err(EngineError::transaction(
                        "a transaction is already prepared, commit or release it first",
                    ));
                }
                let engine = engine_mut(handle)?;
                match engine.prepare_sysupgrade(&mut bridge) {
                    Ok(packages) if packages.is_empty() => {
                        release_quietly(engine);
                        info!("system is up to date");
                        Ok(Some(packages))
                    }
                    Ok(packages) => {
                        *prepared = true;
                        info!(count = packages.len(), "transaction prepared");
                        Ok(Some(packages))
                    }
                    Err(err) => {
                        release_quietly(engine);
                        Err(err)
                    }
                }
            }
            MethodCall::SysUpgrade => {
                if !*prepared {
                    return Err(EngineError::transaction("no transaction is prepared"));
                }
                let engine = engine_mut(handle)?;
                let committed = engine.commit(&mut bridge);
                *prepared = false;
                release_quietly(engine);
                committed.map(|()| None)
            }
            MethodCall::NoSysUpgrade => {
                if !*prepared {
                    return Err(EngineError::transaction("no transaction is prepared"));
                }
                *prepared = false;
                engine_mut(handle)?.release()?;
                info!("transaction released without committing");
                Ok(None)
            }
            MethodCall::FreeAlpm => {
                if let Some(mut engine) = handle.take() {
                    if *prepared {
                        release_quietly(&mut engine);
                        *prepared = false;
                    }
                }
                bridge.session.close();
                info!("engine freed, session closed");
                Ok(None)
            }
        }
    }

    /// Fails every call that was accepted but will never run, and drops the
    /// engine.
    fn shutdown(&mut self) {
        let destination = self
            .session
            .destination()
            .map(ToOwned::to_owned)
            .or_else(|| {
                self.scheduled.iter().find_map(|job| match &job.call {
                    MethodCall::Init { sender } => Some(sender.clone()),
                    _ => None,
                })
            });

        for job in self.scheduled.drain(..) {
            let method = job.call.method();
            self.calls.finish(method);
            if let Some(destination) = &destination {
                self.sink.emit(
                    destination,
                    Signal::failed(method, "the worker is shutting down"),
                );
            }
        }
        for message in self.deferred.drain(..) {
            match message {
                Inbound::Call { reply, .. } | Inbound::Answer { reply, .. } => {
                    let _ = reply.send(Err(CallError::Session(
                        "the worker is shutting down".to_string(),
                    )));
                }
                Inbound::Disconnected { .. } => {}
            }
        }

        if let Some(mut engine) = self.handle.take() {
            if self.prepared {
                release_quietly(&mut engine);
                self.prepared = false;
            }
        }
        self.session.close();
    }
}

fn engine_mut<E: PackageEngine>(handle: &mut Option<E>) -> Result<&mut E, EngineError> {
    handle
        .as_mut()
        .ok_or_else(|| EngineError::transaction("the engine is not initialized"))
}

fn release_quietly<E: PackageEngine>(engine: &mut E) {
    if let Err(err) = engine.release() {
        warn!(error = %err, "failed to release transaction");
    }
}

fn sync_databases<E: PackageEngine>(
    engine: &mut E,
    bridge: &mut QuestionBridge<'_>,
) -> Result<(), EngineError> {
    let databases = engine.databases();
    bridge.sink.emit(
        &bridge.destination,
        Signal::SyncDbsCount(u32::try_from(databases.len()).unwrap_or(u32::MAX)),
    );

    let mut failures = Vec::new();
    for name in databases {
        bridge
            .sink
            .emit(&bridge.destination, Signal::SyncDbStart(name.clone()));
        let result = match engine.update_db(&name, bridge) {
            Ok(DbUpdate::Updated) => SyncDbResult::Success,
            Ok(DbUpdate::UpToDate) => SyncDbResult::NotNeeded,
            Err(err) => {
                warn!(database = %name, error = %err, "failed to synchronize database");
                failures.push(format!("{name}: {err}"));
                SyncDbResult::Failure
            }
        };
        bridge
            .sink
            .emit(&bridge.destination, Signal::SyncDbEnd(result));
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Io(format!(
            "failed to synchronize {} database(s):\n{}",
            failures.len(),
            failures.join("\n")
        )))
    }
}
