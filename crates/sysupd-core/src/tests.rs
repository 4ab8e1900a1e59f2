use std::cmp::Ordering;

use super::*;
use crate::wire::{decode_frame, encode_frame, ClientFrame, FrameReader, WorkerFrame};

fn change(name: &str, old: Option<&str>, new: Option<&str>) -> PackageChange {
    PackageChange {
        name: name.to_string(),
        old_version: old.map(ToOwned::to_owned),
        new_version: new.map(ToOwned::to_owned),
        old_size: 0,
        new_size: 0,
        dl_size: 0,
        repo: Some("core".to_string()),
    }
}

#[test]
fn vercmp_orders_numeric_and_alpha_segments() {
    assert_eq!(vercmp("1.0", "1.0"), Ordering::Equal);
    assert_eq!(vercmp("1.0", "1.1"), Ordering::Less);
    assert_eq!(vercmp("1.10", "1.9"), Ordering::Greater);
    assert_eq!(vercmp("1.0", "1.0.1"), Ordering::Less);
    assert_eq!(vercmp("1.0a", "1.0"), Ordering::Less);
    assert_eq!(vercmp("1.0alpha", "1.0beta"), Ordering::Less);
    assert_eq!(vercmp("1.001", "1.1"), Ordering::Equal);
}

#[test]
fn vercmp_honors_epoch_and_release() {
    assert_eq!(vercmp("1:1.0-1", "2.0-1"), Ordering::Greater);
    assert_eq!(vercmp("0:1.0-1", "1.0-1"), Ordering::Equal);
    assert_eq!(vercmp("1.0-2", "1.0-10"), Ordering::Less);
    assert_eq!(vercmp("1.0-2", "1.0"), Ordering::Equal);
    assert_eq!(vercmp("2.38-3", "2.38-2"), Ordering::Greater);
}

#[test]
fn package_change_kind_follows_versions() {
    assert_eq!(change("a", None, Some("1.0-1")).kind(), ChangeKind::Install);
    assert_eq!(change("a", Some("1.0-1"), None).kind(), ChangeKind::Remove);
    assert_eq!(
        change("a", Some("1.0-1"), Some("1.1-1")).kind(),
        ChangeKind::Upgrade
    );
    assert_eq!(
        change("a", Some("1.1-1"), Some("1.0-1")).kind(),
        ChangeKind::Downgrade
    );
    assert_eq!(
        change("a", Some("1.0-1"), Some("1.0-1")).kind(),
        ChangeKind::Reinstall
    );
}

#[test]
fn removal_is_accounted_by_old_size() {
    let mut removal = change("oldlib", Some("1.0-1"), None);
    removal.old_size = 500;
    assert_eq!(removal.accounted_size(), 500);
    assert_eq!(removal.size_delta(), -500);

    let mut upgrade = change("app", Some("1.0-1"), Some("1.1-1"));
    upgrade.old_size = 500;
    upgrade.new_size = 700;
    assert_eq!(upgrade.accounted_size(), 700);
    assert_eq!(upgrade.file_stem().as_deref(), Some("app-1.1-1"));
}

#[test]
fn siglevel_parses_flag_names() {
    let level = SigLevel::try_from(vec![
        "Package_Optional".to_string(),
        "database".to_string(),
    ])
    .expect("flags must parse");
    assert!(level.contains(SigLevel::PACKAGE_OPTIONAL));
    assert!(level.contains(SigLevel::DATABASE));
    assert!(!level.contains(SigLevel::PACKAGE));
    assert_eq!(level.to_string(), "package-optional,database");

    let err = SigLevel::parse_flag("trust-everything").expect_err("unknown flag must fail");
    assert!(err.to_string().contains("trust-everything"), "got: {err}");
}

#[test]
fn alpm_config_parses_from_toml_and_validates() {
    let config: AlpmConfig = toml::from_str(
        r#"
rootdir = "/"
dbpath = "/var/lib/pacman"
arch = "x86_64"
cachedirs = ["/var/cache/pacman/pkg"]
siglevel = ["package", "database-optional"]
checkspace = true
usedelta = 0.7
ignorepkgs = ["linux"]
"#,
    )
    .expect("config must parse");

    config.validate().expect("config must validate");
    assert!(config.siglevel.contains(SigLevel::DATABASE_OPTIONAL));
    assert!(config.ignorepkgs.contains("linux"));
    assert_eq!(config.usedelta.value(), 0.7);

    let mut broken = config.clone();
    broken.arch = " ".to_string();
    assert!(broken.validate().is_err());
}

#[test]
fn database_config_rejects_reserved_and_serverless_entries() {
    let valid = DatabaseConfig {
        name: "core".to_string(),
        siglevel: SigLevel::USE_DEFAULT,
        servers: vec!["https://mirror.example.test/core/os/x86_64".to_string()],
    };
    valid.validate().expect("valid database must pass");

    let mut local = valid.clone();
    local.name = "local".to_string();
    assert!(local.validate().is_err());

    let mut serverless = valid.clone();
    serverless.servers.clear();
    let err = serverless.validate().expect_err("serverless database must fail");
    assert!(err.to_string().contains("no servers"), "got: {err}");
}

#[test]
fn method_names_round_trip_through_parse() {
    for method in Method::ALL {
        assert_eq!(Method::parse(method.as_str()), Some(method));
    }
    assert_eq!(Method::parse("Answer"), None);
    assert_eq!(MethodCall::SyncDbs.method(), Method::SyncDbs);
    assert!(!Method::Init.needs_handle());
    assert!(Method::GetPackages.needs_handle());
}

#[test]
fn select_provider_accepts_only_listed_indices() {
    let question = Question::SelectProvider {
        dependency: "sh".to_string(),
        providers: vec![
            Provider {
                repo: "core".to_string(),
                package: "bash".to_string(),
                version: "5.2-1".to_string(),
            },
            Provider {
                repo: "extra".to_string(),
                package: "dash".to_string(),
                version: "0.5-1".to_string(),
            },
        ],
    };
    assert!(question.accepts(1));
    assert!(!question.accepts(2));
    assert!(!question.accepts(-1));
    assert_eq!(question.default_answer(), 0);

    let conflict = Question::ConflictPkg {
        package: "a".to_string(),
        conflicting: "b".to_string(),
        reason: "b".to_string(),
    };
    assert!(conflict.accepts(ANSWER_YES));
    assert!(!conflict.accepts(7));
    assert_eq!(conflict.default_answer(), ANSWER_NO);
    assert_eq!(conflict.prompt(), "a and b are in conflict. Remove b?");
}

#[test]
fn engine_error_renders_details() {
    let err = EngineError::with_details(
        "failed to prepare transaction",
        vec!["foo: requires bar".to_string(), "baz: conflicts".to_string()],
    );
    assert_eq!(
        err.to_string(),
        "failed to prepare transaction:\n- foo: requires bar\n- baz: conflicts"
    );
    assert_eq!(EngineError::io("timeout").to_string(), "timeout");
}

#[test]
fn transaction_steps_follow_engine_events() {
    assert_eq!(
        TransactionStep::entered_by(EventKind::RetrieveStart),
        Some(TransactionStep::Downloading)
    );
    assert_eq!(
        TransactionStep::entered_by(EventKind::TransactionStart),
        Some(TransactionStep::Upgrading)
    );
    assert_eq!(TransactionStep::entered_by(EventKind::RetrieveDone), None);
}

#[test]
fn package_changes_survive_the_wire_unchanged() {
    let mut removal = change("oldlib", Some("1.0-1"), None);
    removal.old_size = 500;
    let mut upgrade = change("app", Some("1:1.0-1"), Some("1:1.1-2"));
    upgrade.old_size = 1_024;
    upgrade.new_size = 2_048;
    upgrade.dl_size = 900;
    let sent = vec![removal, upgrade];

    let frame = WorkerFrame::Signal(SignalEnvelope {
        destination: "client-1".to_string(),
        signal: Signal::GetPackagesFinished(sent.clone()),
    });
    let encoded = encode_frame(&frame).expect("frame must encode");
    let line = String::from_utf8(encoded).expect("frame must be utf-8");
    assert!(line.ends_with('\n'));

    let decoded: WorkerFrame = decode_frame(&line).expect("frame must decode");
    let WorkerFrame::Signal(envelope) = decoded else {
        panic!("expected a signal frame");
    };
    let Signal::GetPackagesFinished(received) = envelope.signal else {
        panic!("expected GetPackagesFinished");
    };
    assert_eq!(received, sent);
}

#[tokio::test]
async fn frame_reader_skips_malformed_lines() {
    let input = concat!(
        "{\"frame\":\"call\",\"serial\":1,\"call\":{\"method\":\"SyncDbs\"}}\n",
        "not json at all\n",
        "{\"frame\":\"call\",\"serial\":2,\"call\":{\"method\":\"Bogus\"}}\n",
        "\n",
        "{\"frame\":\"answer\",\"serial\":3,\"code\":1}\n",
    );
    let mut reader = FrameReader::new(input.as_bytes(), "test");

    let first: Option<ClientFrame> = reader.next().await.expect("read must succeed");
    assert_eq!(
        first,
        Some(ClientFrame::Call {
            serial: 1,
            call: MethodCall::SyncDbs
        })
    );
    let second: Option<ClientFrame> = reader.next().await.expect("read must succeed");
    assert_eq!(second, Some(ClientFrame::Answer { serial: 3, code: 1 }));
    let end: Option<ClientFrame> = reader.next().await.expect("read must succeed");
    assert_eq!(end, None);
}

#[test]
fn call_errors_serialize_for_replies() {
    let frame = WorkerFrame::Reply {
        serial: 9,
        result: Err(CallError::ConcurrentCall(Method::AddDb)),
    };
    let encoded = encode_frame(&frame).expect("frame must encode");
    let line = String::from_utf8(encoded).expect("frame must be utf-8");
    let decoded: WorkerFrame = decode_frame(&line).expect("frame must decode");
    assert_eq!(decoded, frame);
}
