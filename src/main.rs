use anyhow::{Context, Result};
use std::io::{self, IsTerminal};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use rmr::cli::{self, Cli};
use rmr::review::{Decision, PromptReviewer, Reviewer, ScriptedReviewer};
use rmr::runner::ToolCommand;
use rmr::session::{self, Config, EXIT_FAILURE, EXIT_STORE_CORRUPT, SessionError, SessionReport};
use rmr::store::StoreError;
use rmr::tui::TerminalReviewer;

const LOG_ENV: &str = "RMR_LOG";

fn main() -> ExitCode {
    let args = cli::parse_args();
    init_logging(args.verbose);

    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("rmr: {:#}", err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn run(args: Cli) -> Result<u8> {
    let working_dir = std::env::current_dir().context("Failed to read current directory")?;
    let config = args.config(working_dir);

    if args.list {
        return handle_list(&config);
    }
    if args.forget {
        return handle_forget(&config);
    }

    let tool = ToolCommand::from_argv(&args.tool).context("No tool given")?;
    let mut reviewer = pick_reviewer(&args);
    let report = session::run(&config, &tool, reviewer.as_mut())?;
    print_report(&report);
    Ok(report.exit_code())
}

/// Full-screen review on a terminal, a line prompt otherwise.
fn pick_reviewer(args: &Cli) -> Box<dyn Reviewer> {
    if args.accept_all {
        return Box::new(ScriptedReviewer::always(Decision::Accept));
    }
    let interactive = io::stdin().is_terminal() && io::stdout().is_terminal();
    if args.plain || !interactive {
        Box::new(PromptReviewer::new(io::stdin().lock(), io::stdout()))
    } else {
        Box::new(TerminalReviewer::new())
    }
}

/// Handle --list: print every remembered rejection for the tool id.
fn handle_list(config: &Config) -> Result<u8> {
    let (_repo, store) = session::open_store(config)?;
    let rejections = store.load(&config.scope)?;

    if rejections.is_empty() {
        println!("No remembered rejections for {}", config.scope);
        return Ok(0);
    }

    println!("Remembered rejections for {} ({})", config.scope, rejections.len());
    for record in rejections.iter() {
        println!("─── {}", record.path);
        for line in record.diff_lines() {
            println!("{}", show_carriage_returns(&line));
        }
    }

    let others: Vec<String> = store
        .scopes()?
        .into_iter()
        .filter(|scope| scope != &config.scope)
        .collect();
    if !others.is_empty() {
        println!("\nOther tool ids: {}", others.join(", "));
    }
    Ok(0)
}

/// Carriage returns are part of what is matched; make them visible.
fn show_carriage_returns(line: &str) -> String {
    line.replace('\r', "^M")
}

/// Handle --forget: drop every remembered rejection for the tool id.
fn handle_forget(config: &Config) -> Result<u8> {
    let (_repo, mut store) = session::open_store(config)?;
    let count = store.clear(&config.scope)?;
    println!("✓ Forgot {} rejections for {}", count, config.scope);
    Ok(0)
}

fn print_report(report: &SessionReport) {
    if !report.suppressed.is_empty() {
        eprintln!(
            "rmr: undid {} change(s) you rejected before",
            report.suppressed.len()
        );
    }
    if report.reviewed() {
        eprintln!(
            "rmr: kept {}, discarded {}",
            report.accepted.len(),
            report.rejected.len()
        );
    }
    if !report.undecided.is_empty() {
        eprintln!(
            "rmr: review stopped early; {} change(s) left applied and not remembered",
            report.undecided.len()
        );
    }
    if !report.undecodable.is_empty() {
        eprintln!("rmr: these files are not UTF-8; their changes were left as the tool made them:");
        for path in &report.undecodable {
            eprintln!("  {}", path.display());
        }
    }
    if report.purged > 0 {
        eprintln!("rmr: forgot {} stale rejection(s)", report.purged);
    }
    if !report.failures.is_empty() {
        eprintln!("rmr: could not undo these changes, please fix them by hand:");
        for failure in &report.failures {
            eprintln!(
                "  {}: {}",
                session::location(None, &failure.hunk),
                failure.error
            );
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(err) = err.downcast_ref::<SessionError>() {
        return err.exit_code();
    }
    match err.downcast_ref::<StoreError>() {
        Some(StoreError::Corrupt(_)) => EXIT_STORE_CORRUPT,
        _ => EXIT_FAILURE,
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(format!("rmr={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}
