mod completion;
mod prompt;
mod render;

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sysupd_client::{connect_unix, Proxy};
use sysupd_core::{link, Caller};
use sysupd_orchestrator::{Orchestrator, RunOutcome, UpgradeRequest};
use sysupd_worker::{SameProcessBroker, Scenario, ScenarioFactory, Worker};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::completion::{write_completions_script, CliCompletionShell};
use crate::prompt::Prompter;
use crate::render::{current_output_style, render_status_line, OutputStyle, TerminalUi};

#[derive(Parser, Debug)]
#[command(name = "sysupd")]
#[command(about = "Upgrade the system through the privileged sysupd worker", long_about = None)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    #[arg(short, long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synchronize databases and upgrade every package.
    Upgrade {
        #[arg(long, default_value = "/etc/sysupd/config.toml")]
        config: PathBuf,
        #[arg(long, default_value = "/run/sysupd.sock", conflicts_with = "simulate")]
        socket: PathBuf,
        /// Run against an in-process worker playing back a scenario file.
        #[arg(long, value_name = "SCENARIO")]
        simulate: Option<PathBuf>,
        /// Proceed without asking.
        #[arg(short, long)]
        yes: bool,
    },
    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.debug);

    match cli.command {
        Commands::Upgrade {
            config,
            socket,
            simulate,
            yes,
        } => {
            let request = UpgradeRequest::load(&config)?;
            let style = current_output_style();
            let prompter = Prompter::new(yes, std::io::stdin().is_terminal());
            let ui = TerminalUi::new(style, prompter);
            let target = match simulate {
                Some(path) => Target::Simulated(Scenario::load(&path)?),
                None => Target::Socket(socket),
            };
            let outcome = run_upgrade(request, ui, target).await?;
            print_outcome(style, &outcome);
        }
        Commands::Completions { shell } => {
            let mut stdout = std::io::stdout().lock();
            write_completions_script(shell, &mut stdout)?;
        }
    }

    Ok(())
}

enum Target {
    Socket(PathBuf),
    Simulated(Scenario),
}

async fn run_upgrade(
    request: UpgradeRequest,
    ui: TerminalUi,
    target: Target,
) -> Result<RunOutcome> {
    let mut orchestrator = Orchestrator::new(request, ui);
    let outcome = match target {
        Target::Socket(path) => orchestrator.run(move || connect(path)).await,
        Target::Simulated(scenario) => {
            let (worker_link, client_link) = link(32);
            let worker = Worker::new(
                ScenarioFactory::new(scenario),
                SameProcessBroker,
                worker_link,
            );
            let handle = std::thread::Builder::new()
                .name("sysupd-worker".to_string())
                .spawn(move || worker.run())
                .context("failed spawning simulated worker")?;

            let caller = Caller::new(format!("sysupd-{}", std::process::id()));
            let outcome = orchestrator
                .run(move || async move { Ok(Proxy::new(caller, client_link)) })
                .await;

            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(Ok(exit))) => debug!(?exit, "simulated worker finished"),
                Ok(Ok(Err(err))) => warn!(error = %err, "simulated worker failed"),
                Ok(Err(_)) => warn!("simulated worker panicked"),
                Err(err) => warn!(error = %err, "failed joining simulated worker"),
            }
            outcome
        }
    };
    orchestrator.into_ui().finish();
    Ok(outcome?)
}

async fn connect(path: PathBuf) -> Result<Proxy> {
    connect_unix(&path)
        .await
        .with_context(|| "is the sysupd worker running?")
}

fn print_outcome(style: OutputStyle, outcome: &RunOutcome) {
    let line = match outcome {
        RunOutcome::Upgraded(summary) => render_status_line(
            style,
            "ok",
            &format!("upgraded system ({} package changes)", summary.total()),
        ),
        RunOutcome::Declined => render_status_line(style, "warn", "upgrade declined"),
        RunOutcome::UpToDate => render_status_line(style, "ok", "system is up to date"),
    };
    println!("{line}");
}

fn init_tracing(verbose: bool, debug: bool) {
    let default = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests;
