use crate::config::launcher::LauncherConfig;
use crate::exec::launcher::{LaunchStatus, Launcher};
use crate::runtime::ScriptedHost;
use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use std::io;
use std::path::{Path, PathBuf};

/// Run one script under a locked set of audit hooks
#[derive(Parser, Debug)]
#[command(name = "auditbox", author, version, about, long_about = None)]
struct Cli {
    /// Script to run (only `.py` files are accepted), then its arguments.
    /// Debug builds read statements from stdin when the first argument is `-i`.
    #[arg(
        value_name = "FILE",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 0..
    )]
    argv: Vec<String>,
}

/// What the command line asks the launcher to run
#[derive(Debug, PartialEq, Eq)]
enum Invocation {
    Script(PathBuf),
    Interactive,
}

/// Only a leading `-i` selects the statement loop, and only in debug
/// builds. Everything after the script belongs to the script.
fn invocation(argv: &[String], debug_build: bool) -> Option<Invocation> {
    match argv.first().map(String::as_str) {
        None => None,
        Some("-i") if debug_build => Some(Invocation::Interactive),
        Some(script) => Some(Invocation::Script(PathBuf::from(script))),
    }
}

fn usage(program: &Path) -> ! {
    eprintln!("usage: {} file [arg] ...", program.display());
    std::process::exit(1);
}

fn report(status: &LaunchStatus) {
    match status {
        LaunchStatus::Completed => {}
        LaunchStatus::ScriptFailed { kind, message } => eprintln!("{}: {}", kind, message),
        LaunchStatus::SourceUnavailable { path, .. } => {
            eprintln!("failed to open source file {}", path.display())
        }
        LaunchStatus::HostFailed(message) => eprintln!("Fatal error: {}", message),
    }
}

pub fn run() -> Result<()> {
    env_logger::init();

    let program = std::env::args_os()
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("auditbox"));

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.print()?;
            std::process::exit(0);
        }
        Err(e) => {
            e.print()?;
            std::process::exit(1);
        }
    };

    // Usage errors are settled before anything is opened
    let Some(launch) = invocation(&cli.argv, cfg!(debug_assertions)) else {
        usage(&program);
    };
    let interactive = launch == Invocation::Interactive;

    let config = LauncherConfig::restricted(&program).with_interactive(interactive);
    log::debug!("Effective configuration: {}", config.to_json()?);

    let launcher = match Launcher::new(config, Box::new(ScriptedHost::new())).bootstrap() {
        Ok(launcher) => launcher,
        Err(e) => {
            eprintln!("Fatal error: {}", e);
            std::process::exit(1);
        }
    };

    let locked = match launcher.lock(&cli.argv) {
        Ok(locked) => locked,
        Err(e) => {
            eprintln!("Fatal error: {}", e);
            std::process::exit(1);
        }
    };

    let done = match launch {
        Invocation::Script(path) => locked.run_script(&path),
        Invocation::Interactive => locked.interactive(&mut io::stdin().lock()),
    };
    report(done.status());
    std::process::exit(done.exit_code());
}
