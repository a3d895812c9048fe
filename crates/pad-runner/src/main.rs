//! padscript
//!
//! Runs controller automation scripts against a serial adapter, a 3DS
//! running input redirection, or an in-memory dry-run backend.

mod backend;
mod listing;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pad_config::{PadConfig, DEFAULT_CONFIG_FILE};
use pad_core::Script;
use pad_script::{
    CommandRegistry, ProcessRunner, RunEvent, RunOutcome, RunReport, ScriptEngine,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "padscript", version)]
#[command(about = "Run controller automation scripts")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Run a script until it ends, fails, or Ctrl-C
    Run {
        script: PathBuf,

        /// Use the in-memory backend regardless of the configuration
        #[arg(long)]
        dry_run: bool,

        /// Print the final variables as JSON
        #[arg(long)]
        vars: bool,
    },
    /// Validate a script against the configured backend without running it
    Check { script: PathBuf },
    /// List the available commands
    Commands,
}

fn init_logging(config: &PadConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PadConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    init_logging(&config);

    match cli.action {
        Action::Run {
            script,
            dry_run,
            vars,
        } => run(&config, &script, dry_run, vars).await,
        Action::Check { script } => check(&config, &script),
        Action::Commands => {
            print!("{}", listing::render(&CommandRegistry::with_builtins()));
            Ok(())
        }
    }
}

fn load_script(path: &Path) -> Result<Script> {
    Script::load(path).with_context(|| format!("failed to load script {}", path.display()))
}

fn check(config: &PadConfig, path: &Path) -> Result<()> {
    let script = load_script(path)?;
    let backend = backend::build(&config.backend, false)?;
    let engine = ScriptEngine::new(Some(backend));
    let jumps = engine
        .check(&script)
        .with_context(|| format!("{} is invalid", script.display_name()))?;
    println!(
        "{}: ok ({} commands, {} labels)",
        script.display_name(),
        script.len(),
        jumps.labels.len()
    );
    Ok(())
}

async fn run(config: &PadConfig, path: &Path, dry_run: bool, print_vars: bool) -> Result<()> {
    let script = load_script(path)?;
    let backend = backend::connect(&config.backend, dry_run)?;
    let runner = ProcessRunner::new(&config.external.interpreter, &config.external.dir)
        .with_timeout(config.external.timeout());
    let engine = Arc::new(ScriptEngine::new(Some(Arc::clone(&backend))).with_external(Arc::new(runner)));

    let mut events = engine.subscribe();
    let progress = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RunEvent::Step { ip, command, .. }) => debug!(ip, command = %command, "step"),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "progress lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let handle = engine.start(script)?;
    let stopper = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping run");
                engine.stop();
            }
        })
    };

    let report = tokio::task::spawn_blocking(move || handle.wait()).await??;
    stopper.abort();
    progress.abort();
    backend.disconnect();

    summarize(&report, print_vars)
}

fn summarize(report: &RunReport, print_vars: bool) -> Result<()> {
    if print_vars {
        println!("{}", serde_json::to_string_pretty(&report.vars)?);
    }
    match &report.result {
        Ok(outcome) => {
            let verb = match outcome {
                RunOutcome::Completed => "completed",
                RunOutcome::Stopped => "stopped",
            };
            info!(run_id = %report.run_id, steps = report.steps, elapsed = ?report.elapsed, "Run {verb}");
            println!(
                "{}: {verb} after {} steps in {:.2?}",
                report.script, report.steps, report.elapsed
            );
            Ok(())
        }
        Err(e) => match report.failed_ip {
            Some(ip) => bail!("{} failed at #{ip}: {e}", report.script),
            None => bail!("{} failed: {e}", report.script),
        },
    }
}
