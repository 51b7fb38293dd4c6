//! pwngate CLI
//!
//! An operator shell over a simulated debug target:
//! - interactive prompt with line editing and bare-Enter repeat
//! - scripted runs (`--script`, `--command`) for automation and tests
//! - settings from a JSON config file, changeable with `set` at the prompt

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use pwngate_core::{Config, StdConsole};
use std::path::PathBuf;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

mod commands;
mod repl;
mod target;

use repl::Shell;
use target::SimulatedTarget;

#[derive(Parser)]
#[command(name = "pwngate")]
#[command(
    author,
    version,
    about = "pwngate: command dispatch and heap-strategy selection over a simulated debuggee"
)]
struct Cli {
    /// JSON description of the target (registers, symbols, session flags).
    #[arg(long)]
    target: Option<PathBuf>,

    /// JSON settings file (same names as `show` prints, with underscores).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a command non-interactively (repeatable).
    #[arg(short = 'x', long = "command")]
    commands: Vec<String>,

    /// Run commands from a file (`-` for stdin), one per line.
    #[arg(long)]
    script: Option<PathBuf>,

    /// Keep going after a command raises in verbose mode.
    #[arg(long)]
    continue_on_error: bool,

    /// Do not echo scripted commands.
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). `PWNGATE_LOG`
    /// takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) -> Result<()> {
    let filter = match std::env::var("PWNGATE_LOG") {
        Ok(directives) => EnvFilter::try_new(directives)?,
        Err(_) => EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let target = match &cli.target {
        Some(path) => SimulatedTarget::load(path)?,
        None => SimulatedTarget::default(),
    };
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let mut shell = Shell::new(Rc::new(target), config, StdConsole)
        .context("failed to set up the shell")?;

    let mut lines = Vec::new();
    if let Some(path) = &cli.script {
        lines.extend(repl::read_script(path)?);
    }
    lines.extend(cli.commands.iter().cloned());

    if cli.script.is_none() && cli.commands.is_empty() {
        return repl::run_interactive(&mut shell);
    }
    repl::run_script(&mut shell, &lines, cli.continue_on_error, cli.quiet)
}
