use std::thread::JoinHandle;
use std::time::Duration;

use sysupd_core::{
    link, AlpmConfig, AnswerCode, CallError, Caller, DatabaseConfig, EngineEvent, Inbound,
    Method, MethodCall, PackageEvent, Question, QuestionKind, Signal, SignalEnvelope,
    SyncDbResult, WorkerLink,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use super::*;

const DEST: &str = "client";

const SCENARIO: &str = r#"
[[databases]]
name = "core"

[[databases]]
name = "extra"
outcome = "up-to-date"

[[packages]]
name = "linux"
old_version = "6.1.1-1"
new_version = "6.1.2-1"
old_size = 1000
new_size = 1200
dl_size = 300
repo = "core"

[[packages]]
name = "oldlib"
old_version = "1.0-1"
old_size = 500
"#;

const CONFLICT_SCENARIO: &str = r#"
[[databases]]
name = "core"

[[packages]]
name = "b"
old_version = "1.0-1"
new_version = "2.0-1"
new_size = 100
dl_size = 10
repo = "core"

[[questions]]
stage = "prepare"
decline_aborts = true
question = { question = "ConflictPkg", args = { package = "a", conflicting = "b", reason = "b" } }
"#;

fn alpm_config() -> AlpmConfig {
    toml::from_str(
        r#"
rootdir = "/"
dbpath = "/var/lib/pacman"
arch = "x86_64"
"#,
    )
    .expect("must parse alpm config")
}

fn database(name: &str) -> DatabaseConfig {
    DatabaseConfig {
        name: name.to_string(),
        siglevel: sysupd_core::SigLevel::USE_DEFAULT,
        servers: vec![format!("https://mirror.example.org/{name}/os/x86_64")],
    }
}

fn scenario(raw: &str) -> Scenario {
    Scenario::from_toml(raw).expect("must parse scenario")
}

struct Harness {
    caller: Caller,
    requests: mpsc::Sender<Inbound>,
    signals: mpsc::UnboundedReceiver<SignalEnvelope>,
    worker: Option<JoinHandle<Result<WorkerExit, WorkerError>>>,
}

impl Harness {
    fn spawn(scenario: Scenario) -> Self {
        Self::spawn_with(scenario, SameProcessBroker)
    }

    fn spawn_with<B>(scenario: Scenario, broker: B) -> Self
    where
        B: PrivilegeBroker + Send + 'static,
    {
        Self::spawn_worker(|link| Worker::new(ScenarioFactory::new(scenario), broker, link))
    }

    fn spawn_worker<B>(build: impl FnOnce(WorkerLink) -> Worker<ScenarioFactory, B>) -> Self
    where
        B: PrivilegeBroker + Send + 'static,
    {
        let (worker_link, client_link) = link(8);
        let worker = build(worker_link);
        let handle = std::thread::spawn(move || worker.run());
        Self {
            caller: Caller::with_uid(":1.42", 1000),
            requests: client_link.requests,
            signals: client_link.signals,
            worker: Some(handle),
        }
    }

    async fn send_call(
        &self,
        caller: &Caller,
        call: MethodCall,
    ) -> oneshot::Receiver<Result<(), CallError>> {
        let (reply, ack) = oneshot::channel();
        self.requests
            .send(Inbound::Call {
                caller: caller.clone(),
                call,
                reply,
            })
            .await
            .expect("must reach worker");
        ack
    }

    async fn call_as(&self, caller: &Caller, call: MethodCall) -> Result<(), CallError> {
        self.send_call(caller, call)
            .await
            .await
            .expect("must acknowledge call")
    }

    async fn call(&self, call: MethodCall) -> Result<(), CallError> {
        let caller = self.caller.clone();
        self.call_as(&caller, call).await
    }

    async fn answer(&self, code: AnswerCode) -> Result<(), CallError> {
        let (reply, ack) = oneshot::channel();
        self.requests
            .send(Inbound::Answer {
                caller: self.caller.clone(),
                code,
                reply,
            })
            .await
            .expect("must reach worker");
        ack.await.expect("must acknowledge answer")
    }

    async fn signal(&mut self) -> Signal {
        let envelope = timeout(Duration::from_secs(5), self.signals.recv())
            .await
            .expect("must signal in time")
            .expect("must keep signal channel open");
        assert_eq!(envelope.destination, DEST);
        envelope.signal
    }

    async fn question(&mut self) -> Question {
        loop {
            if let Signal::Question(question) = self.signal().await {
                return question;
            }
        }
    }

    /// Signals up to and including the one completing `method`.
    async fn until_complete(&mut self, method: Method) -> Vec<Signal> {
        let mut seen = Vec::new();
        loop {
            let signal = self.signal().await;
            let done = signal.completes() == Some(method);
            seen.push(signal);
            if done {
                return seen;
            }
        }
    }

    async fn run_method(&mut self, call: MethodCall) -> Vec<Signal> {
        let method = call.method();
        self.call(call).await.expect("must accept call");
        self.until_complete(method).await
    }

    async fn open(&mut self, databases: &[&str]) {
        let init = self
            .run_method(MethodCall::Init {
                sender: DEST.to_string(),
            })
            .await;
        assert_eq!(init.last(), Some(&Signal::finished(Method::Init)));
        let opened = self
            .run_method(MethodCall::InitAlpm(Box::new(alpm_config())))
            .await;
        assert_eq!(opened.last(), Some(&Signal::finished(Method::InitAlpm)));
        for name in databases {
            let added = self.run_method(MethodCall::AddDb(database(name))).await;
            assert_eq!(added.last(), Some(&Signal::finished(Method::AddDb)));
        }
    }

    async fn join(mut self) -> Result<WorkerExit, WorkerError> {
        let handle = self.worker.take().expect("must own worker handle");
        drop(self.requests);
        tokio::task::spawn_blocking(move || handle.join())
            .await
            .expect("must join blocking task")
            .expect("worker must not panic")
    }
}

fn last(signals: &[Signal]) -> &Signal {
    signals.last().expect("must have at least one signal")
}

#[test]
fn call_table_rejects_a_second_running_call() {
    let mut calls = CallTable::default();
    calls.start(Method::SyncDbs).expect("must start");
    assert_eq!(
        calls.start(Method::SyncDbs),
        Err(CallError::ConcurrentCall(Method::SyncDbs))
    );
    calls.start(Method::GetPackages).expect("must start other method");
    assert!(calls.finish(Method::SyncDbs));
    assert!(!calls.is_running(Method::SyncDbs));
    calls.start(Method::SyncDbs).expect("must start again after finishing");
}

#[test]
fn question_slot_holds_one_question_at_a_time() {
    let mut slot = QuestionSlot::default();
    assert_eq!(slot.answer(1), Err(CallError::NoPendingQuestion));

    let question = Question::InstallIgnorePkg {
        package: "linux".to_string(),
    };
    slot.raise(question.clone()).expect("must raise");
    assert_eq!(
        slot.raise(question.clone()),
        Err(QuestionKind::InstallIgnorePkg)
    );

    slot.answer(7).expect("must record answer");
    assert_eq!(
        slot.state(),
        &QuestionState::Answered(QuestionKind::InstallIgnorePkg, 0)
    );
    assert_eq!(slot.take_answer(), Some(0));
    assert!(!slot.is_pending());
    assert_eq!(slot.answer(1), Err(CallError::NoPendingQuestion));
}

#[test]
fn session_slot_binds_once() {
    let mut slot = SessionSlot::default();
    let owner = Caller::new(":1.1");
    let other = Caller::new(":1.2");

    assert!(slot.authorize(&owner).is_err());
    slot.bind(owner.clone(), "dest".to_string())
        .expect("must bind");
    slot.authorize(&owner).expect("must authorize owner");
    assert!(slot.authorize(&other).expect_err("must reject").is_session());
    assert!(slot.bind(other, "dest".to_string()).is_err());

    slot.close();
    assert!(slot.is_closed());
    assert!(slot.check_bindable().is_err());
}

#[test]
fn allow_list_broker_grants_root_and_listed_uids() {
    let broker = AllowListBroker::new([1000]);
    assert!(broker
        .check(&Caller::with_uid("a", 0), sysupd_core::SYSUPGRADE_ACTION)
        .expect("must check"));
    assert!(broker
        .check(&Caller::with_uid("b", 1000), sysupd_core::SYSUPGRADE_ACTION)
        .expect("must check"));
    assert!(!broker
        .check(&Caller::with_uid("c", 1001), sysupd_core::SYSUPGRADE_ACTION)
        .expect("must check"));
    assert!(!broker
        .check(&Caller::new("d"), sysupd_core::SYSUPGRADE_ACTION)
        .expect("must check"));
}

#[test]
fn scenario_parses_packages_and_questions() {
    let parsed = scenario(CONFLICT_SCENARIO);
    assert_eq!(parsed.databases[0].outcome, SyncOutcome::Updated);
    assert_eq!(parsed.packages[0].change.name, "b");
    assert_eq!(parsed.packages[0].change.dl_size, 10);
    assert_eq!(parsed.questions[0].stage, ScenarioStage::Prepare);
    assert_eq!(parsed.questions[0].question.kind(), QuestionKind::ConflictPkg);
}

#[tokio::test]
async fn full_upgrade_runs_every_method_to_completion() {
    let mut harness = Harness::spawn(scenario(SCENARIO));
    harness.open(&["core", "extra"]).await;

    let synced = harness.run_method(MethodCall::SyncDbs).await;
    assert_eq!(synced[0], Signal::SyncDbsCount(2));
    let results: Vec<SyncDbResult> = synced
        .iter()
        .filter_map(|signal| match signal {
            Signal::SyncDbEnd(result) => Some(*result),
            _ => None,
        })
        .collect();
    assert_eq!(results, vec![SyncDbResult::Success, SyncDbResult::NotNeeded]);
    assert_eq!(last(&synced), &Signal::finished(Method::SyncDbs));

    let listed = harness.run_method(MethodCall::GetPackages).await;
    let Signal::GetPackagesFinished(packages) = last(&listed) else {
        panic!("GetPackages must complete with a package list");
    };
    assert_eq!(packages.len(), 2);
    assert_eq!(packages[1].name, "oldlib");
    assert_eq!(packages[1].accounted_size(), 500);

    let committed = harness.run_method(MethodCall::SysUpgrade).await;
    assert_eq!(last(&committed), &Signal::finished(Method::SysUpgrade));
    assert!(committed.contains(&Signal::Engine(EngineEvent::TotalDownload(300))));
    assert!(committed.contains(&Signal::Engine(EngineEvent::Package(
        PackageEvent::Removed {
            package: "oldlib".to_string(),
            version: "1.0-1".to_string(),
        }
    ))));
    assert!(committed.iter().any(|signal| matches!(
        signal,
        Signal::Engine(EngineEvent::Downloading { file, .. })
            if file == "linux-6.1.2-1-x86_64.pkg.tar.zst"
    )));

    let freed = harness.run_method(MethodCall::FreeAlpm).await;
    assert_eq!(last(&freed), &Signal::finished(Method::FreeAlpm));
    assert_eq!(harness.join().await.expect("must exit cleanly"), WorkerExit::Freed);
}

#[tokio::test]
async fn calls_before_init_and_from_other_callers_are_rejected() {
    let mut harness = Harness::spawn(scenario(SCENARIO));
    let error = harness
        .call(MethodCall::SyncDbs)
        .await
        .expect_err("must reject call without a session");
    assert!(error.is_session());

    harness.open(&["core"]).await;

    let stranger = Caller::with_uid(":1.99", 1001);
    let error = harness
        .call_as(&stranger, MethodCall::SyncDbs)
        .await
        .expect_err("must reject a foreign caller");
    assert!(error.is_session());

    let error = harness
        .call(MethodCall::Init {
            sender: DEST.to_string(),
        })
        .await
        .expect_err("must reject a second Init");
    assert!(error.is_session());

    assert_eq!(harness.answer(1).await, Err(CallError::NoPendingQuestion));

    let listed = harness.run_method(MethodCall::SysUpgrade).await;
    assert!(matches!(
        last(&listed),
        Signal::MethodFailed { method: Method::SysUpgrade, .. }
    ));
}

#[tokio::test]
async fn conflict_question_is_asked_once_and_resolved() {
    let mut harness = Harness::spawn(scenario(CONFLICT_SCENARIO));
    harness.open(&["core"]).await;

    harness
        .call(MethodCall::GetPackages)
        .await
        .expect("must accept GetPackages");
    let question = harness.question().await;
    assert_eq!(question.prompt(), "a and b are in conflict. Remove b?");
    harness.answer(1).await.expect("must accept answer");

    let rest = harness.until_complete(Method::GetPackages).await;
    assert!(!rest
        .iter()
        .any(|signal| matches!(signal, Signal::Question(_))));
    let Signal::GetPackagesFinished(packages) = last(&rest) else {
        panic!("GetPackages must finish after the answer");
    };
    assert_eq!(packages.len(), 1);
}

#[tokio::test]
async fn calls_wait_while_a_question_is_pending() {
    let mut harness = Harness::spawn(scenario(CONFLICT_SCENARIO));
    harness.open(&["core"]).await;

    harness
        .call(MethodCall::GetPackages)
        .await
        .expect("must accept GetPackages");
    harness.question().await;

    let caller = harness.caller.clone();
    let mut deferred = harness.send_call(&caller, MethodCall::SyncDbs).await;
    assert!(
        timeout(Duration::from_millis(100), &mut deferred)
            .await
            .is_err(),
        "a call must not be acknowledged while the question is pending"
    );

    harness.answer(1).await.expect("must accept answer");
    let listed = harness.until_complete(Method::GetPackages).await;
    assert!(matches!(last(&listed), Signal::GetPackagesFinished(_)));

    deferred
        .await
        .expect("must acknowledge deferred call")
        .expect("must accept deferred call");
    let synced = harness.until_complete(Method::SyncDbs).await;
    assert_eq!(last(&synced), &Signal::finished(Method::SyncDbs));
}

#[tokio::test]
async fn repeated_call_is_refused_while_the_first_asks_a_question() {
    let mut harness = Harness::spawn(scenario(CONFLICT_SCENARIO));
    harness.open(&["core"]).await;

    harness
        .call(MethodCall::GetPackages)
        .await
        .expect("must accept GetPackages");
    harness.question().await;

    let caller = harness.caller.clone();
    let repeat = harness.send_call(&caller, MethodCall::GetPackages).await;
    let refused = timeout(Duration::from_secs(1), repeat)
        .await
        .expect("must acknowledge the repeated call at once")
        .expect("must reply to the repeated call");
    assert_eq!(refused, Err(CallError::ConcurrentCall(Method::GetPackages)));

    harness.answer(1).await.expect("must accept answer");
    let listed = harness.until_complete(Method::GetPackages).await;
    assert!(matches!(last(&listed), Signal::GetPackagesFinished(_)));

    let released = harness.run_method(MethodCall::NoSysUpgrade).await;
    assert_eq!(last(&released), &Signal::finished(Method::NoSysUpgrade));
    assert!(released
        .iter()
        .all(|signal| signal.completes() != Some(Method::GetPackages)));
}

#[tokio::test]
async fn init_sender_must_name_the_caller_when_required() {
    let mut harness = Harness::spawn_worker(|link| {
        Worker::new(
            ScenarioFactory::new(scenario(SCENARIO)),
            SameProcessBroker,
            link,
        )
        .own_sender_only()
    });

    let error = harness
        .call(MethodCall::Init {
            sender: "conn-7".to_string(),
        })
        .await
        .expect_err("must reject a foreign sender");
    assert!(error.is_session());

    let own = harness.caller.name.clone();
    harness
        .call(MethodCall::Init {
            sender: own.clone(),
        })
        .await
        .expect("must accept the caller's own name");
    let envelope = timeout(Duration::from_secs(5), harness.signals.recv())
        .await
        .expect("must signal in time")
        .expect("must keep signal channel open");
    assert_eq!(envelope.destination, own);
    assert_eq!(envelope.signal, Signal::finished(Method::Init));
}

#[tokio::test]
async fn declined_conflict_fails_the_method() {
    let mut harness = Harness::spawn(scenario(CONFLICT_SCENARIO));
    harness.open(&["core"]).await;

    harness
        .call(MethodCall::GetPackages)
        .await
        .expect("must accept GetPackages");
    harness.question().await;
    harness.answer(0).await.expect("must accept answer");

    let rest = harness.until_complete(Method::GetPackages).await;
    let Signal::MethodFailed { message, .. } = last(&rest) else {
        panic!("declining must fail GetPackages");
    };
    assert!(message.contains("a and b are in conflict"));

    let released = harness.run_method(MethodCall::NoSysUpgrade).await;
    assert!(matches!(
        last(&released),
        Signal::MethodFailed { method: Method::NoSysUpgrade, .. }
    ));
}

#[tokio::test]
async fn failed_database_sync_can_be_retried() {
    let mut harness = Harness::spawn(scenario(
        r#"
[[databases]]
name = "core"

[[databases]]
name = "flaky"
outcome = "fail"
error = "connection timed out"
fail_times = 1
"#,
    ));
    harness.open(&["core", "flaky"]).await;

    let first = harness.run_method(MethodCall::SyncDbs).await;
    let ends: Vec<&Signal> = first
        .iter()
        .filter(|signal| matches!(signal, Signal::SyncDbEnd(_)))
        .collect();
    assert_eq!(
        ends,
        vec![
            &Signal::SyncDbEnd(SyncDbResult::Success),
            &Signal::SyncDbEnd(SyncDbResult::Failure)
        ]
    );
    let Signal::MethodFailed { message, .. } = last(&first) else {
        panic!("a failed database must fail SyncDbs");
    };
    assert!(message.contains("flaky"));
    assert!(message.contains("connection timed out"));

    let second = harness.run_method(MethodCall::SyncDbs).await;
    assert_eq!(last(&second), &Signal::finished(Method::SyncDbs));
}

#[tokio::test]
async fn disconnect_with_pending_question_uses_the_default_answer() {
    let mut harness = Harness::spawn(scenario(CONFLICT_SCENARIO));
    harness.open(&["core"]).await;

    harness
        .call(MethodCall::GetPackages)
        .await
        .expect("must accept GetPackages");
    harness.question().await;
    harness
        .requests
        .send(Inbound::Disconnected {
            caller: harness.caller.clone(),
        })
        .await
        .expect("must reach worker");

    let rest = harness.until_complete(Method::GetPackages).await;
    assert!(matches!(
        last(&rest),
        Signal::MethodFailed { method: Method::GetPackages, .. }
    ));
    assert_eq!(
        harness.join().await.expect("must exit cleanly"),
        WorkerExit::SessionClosed
    );
}

#[tokio::test]
async fn denied_authorization_ends_the_worker() {
    let deny = |_: &Caller, _: &str| -> anyhow::Result<bool> { Ok(false) };
    let mut harness = Harness::spawn_with(scenario(SCENARIO), deny);

    harness
        .call(MethodCall::Init {
            sender: DEST.to_string(),
        })
        .await
        .expect("must acknowledge Init");
    assert!(matches!(
        harness.signal().await,
        Signal::MethodFailed { method: Method::Init, .. }
    ));

    let error = harness.join().await.expect_err("must fail the worker");
    assert!(matches!(error, WorkerError::AuthorizationDenied { .. }));
}

#[tokio::test]
async fn invalid_database_is_reported_as_method_failure() {
    let mut harness = Harness::spawn(scenario(SCENARIO));
    harness.open(&[]).await;

    let mut local = database("local");
    local.servers.clear();
    let added = harness.run_method(MethodCall::AddDb(local)).await;
    let Signal::MethodFailed { message, .. } = last(&added) else {
        panic!("AddDb must fail");
    };
    assert!(message.contains("reserved"));

    let added = harness.run_method(MethodCall::AddDb(database("core"))).await;
    assert_eq!(last(&added), &Signal::finished(Method::AddDb));
}
