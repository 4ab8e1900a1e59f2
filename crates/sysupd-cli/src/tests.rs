use clap::Parser;
use sysupd_core::{PackageChange, Provider, Question};
use sysupd_orchestrator::TransactionSummary;

use super::*;
use crate::prompt::{parse_choice, parse_yes_no, provider_lines};
use crate::render::{format_summary_lines, render_section_header, resolve_output_style};

const CONFIG: &str = r#"
[alpm]
rootdir = "/"
dbpath = "/var/lib/pacman"
arch = "x86_64"

[[databases]]
name = "core"
servers = ["https://mirror.example.org/core/os/x86_64"]
"#;

const SCENARIO: &str = r#"
[[databases]]
name = "core"

[[packages]]
name = "linux"
old_version = "6.1.1-1"
new_version = "6.1.2-1"
old_size = 1000
new_size = 1200
dl_size = 300
repo = "core"
"#;

#[test]
fn upgrade_accepts_simulate_and_yes() {
    let cli = Cli::try_parse_from([
        "sysupd",
        "upgrade",
        "--config",
        "sysupd.toml",
        "--simulate",
        "scenario.toml",
        "--yes",
    ])
    .expect("must parse upgrade");
    let Commands::Upgrade { simulate, yes, .. } = cli.command else {
        panic!("expected upgrade command");
    };
    assert_eq!(simulate, Some(PathBuf::from("scenario.toml")));
    assert!(yes);
}

#[test]
fn socket_and_simulate_conflict() {
    let result = Cli::try_parse_from([
        "sysupd",
        "upgrade",
        "--socket",
        "/tmp/sysupd.sock",
        "--simulate",
        "scenario.toml",
    ]);
    assert!(result.is_err());
}

#[test]
fn completions_script_names_the_binary() {
    let mut output = Vec::new();
    write_completions_script(CliCompletionShell::Bash, &mut output)
        .expect("must write completions");
    let script = String::from_utf8(output).expect("must be utf-8");
    assert!(script.contains("sysupd"));
    assert!(script.contains("upgrade"));
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "system is up to date"),
        "system is up to date"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "upgrade declined"),
        "[WARN] upgrade declined"
    );
    assert!(render_section_header(OutputStyle::Plain, "upgrading").is_none());
}

#[test]
fn resolve_output_style_honors_tty_and_no_color() {
    assert_eq!(resolve_output_style(true, false), OutputStyle::Rich);
    assert_eq!(resolve_output_style(true, true), OutputStyle::Plain);
    assert_eq!(resolve_output_style(false, false), OutputStyle::Plain);
}

#[test]
fn yes_no_answers_fall_back_to_default_on_empty_input() {
    assert_eq!(parse_yes_no("\n", true), Some(true));
    assert_eq!(parse_yes_no(" N \n", true), Some(false));
    assert_eq!(parse_yes_no("yes", false), Some(true));
    assert_eq!(parse_yes_no("maybe", false), None);
}

#[test]
fn provider_choice_is_one_based() {
    assert_eq!(parse_choice("", 2), Some(0));
    assert_eq!(parse_choice("2\n", 2), Some(1));
    assert_eq!(parse_choice("3", 2), None);
    assert_eq!(parse_choice("0", 2), None);

    let question = Question::SelectProvider {
        dependency: "java-runtime".to_string(),
        providers: vec![
            Provider {
                repo: "extra".to_string(),
                package: "jre-openjdk".to_string(),
                version: "21.0.1-1".to_string(),
            },
            Provider {
                repo: "extra".to_string(),
                package: "jre17-openjdk".to_string(),
                version: "17.0.9-1".to_string(),
            },
        ],
    };
    assert_eq!(
        provider_lines(&question),
        vec![
            "  1) extra/jre-openjdk 21.0.1-1".to_string(),
            "  2) extra/jre17-openjdk 17.0.9-1".to_string(),
        ]
    );
}

#[tokio::test]
async fn unattended_prompts_use_defaults() {
    let prompter = Prompter::new(false, false);
    assert!(!prompter.confirm("remove?", false).await);
    let question = Question::RemovePkgs {
        packages: vec!["oldlib".to_string()],
    };
    assert_eq!(prompter.answer(&question).await, 0);

    let prompter = Prompter::new(true, false);
    assert_eq!(prompter.answer(&question).await, 1);
}

#[test]
fn summary_lines_list_every_change() {
    let packages = vec![PackageChange {
        name: "linux".to_string(),
        old_version: Some("6.1.1-1".to_string()),
        new_version: Some("6.1.2-1".to_string()),
        old_size: 1000,
        new_size: 1200,
        dl_size: 300,
        repo: Some("core".to_string()),
    }];
    let summary = TransactionSummary::from_changes(&packages);
    let lines = format_summary_lines(&summary, &packages);
    assert_eq!(lines[0], "upgrade    linux 6.1.1-1 -> 6.1.2-1");
    assert!(lines.contains(&"upgrade: 1".to_string()));
    assert!(lines.contains(&"total download size: 300 B".to_string()));
    assert!(lines.contains(&"net upgrade size: 200 B".to_string()));
}

#[tokio::test]
async fn simulated_upgrade_runs_to_completion() {
    let request = UpgradeRequest::from_toml(CONFIG).expect("must parse config");
    let scenario = Scenario::from_toml(SCENARIO).expect("must parse scenario");
    let ui = TerminalUi::new(OutputStyle::Plain, Prompter::new(true, false));

    let outcome = run_upgrade(request, ui, Target::Simulated(scenario))
        .await
        .expect("must upgrade");
    let RunOutcome::Upgraded(summary) = outcome else {
        panic!("expected an upgrade, got {outcome:?}");
    };
    assert_eq!(summary.total(), 1);
}

#[tokio::test]
async fn missing_socket_is_reported() {
    let dir = tempfile::tempdir().expect("must create temp dir");
    let request = UpgradeRequest::from_toml(CONFIG).expect("must parse config");
    let ui = TerminalUi::new(OutputStyle::Plain, Prompter::new(true, false));

    let err = run_upgrade(request, ui, Target::Socket(dir.path().join("missing.sock")))
        .await
        .expect_err("must fail without a worker");
    assert!(format!("{err:#}").contains("is the sysupd worker running?"));
}
