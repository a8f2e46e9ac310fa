mod provision;
mod render;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use localocr_core::{BootstrapConfig, StageId};
use localocr_installer::{
    current_unix_timestamp, read_run_journal, write_run_journal, Host, ShellFolders, SystemHost,
    WorkspaceLayout,
};
use tracing::level_filters::LevelFilter;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::provision::{run_provision, stage_satisfied, ProvisionContext, StageEvent};
use crate::render::{
    current_output_style, format_failure_lines, format_run_journal_lines,
    format_stage_outcome_line, format_stage_status_lines, TerminalRenderer,
};

const LOG_ENV_VAR: &str = "LOCALOCR_LOG";

#[derive(Parser, Debug)]
#[command(name = "localocr-setup")]
#[command(about = "Provision the local OCR application stack", long_about = None)]
struct Cli {
    /// Workspace root; defaults to the current directory.
    #[arg(long)]
    root: Option<PathBuf>,
    /// Config file; defaults to localocr.toml in the workspace root when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Install every missing dependency, in order.
    Provision,
    /// Report which stages are already satisfied, without changing anything.
    Status,
    /// Print the effective configuration as TOML.
    ShowConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run_cli(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn run_cli(cli: Cli) -> Result<ExitCode> {
    let layout = WorkspaceLayout::from_root_arg(cli.root.as_deref())?;
    let config = load_config(&layout, cli.config.as_deref())?;
    let renderer = TerminalRenderer::from_style(current_output_style());

    match cli.command.unwrap_or(Commands::Provision) {
        Commands::Provision => {
            let ctx = ProvisionContext::new(layout, config, ShellFolders::detect())?;
            let mut host = SystemHost::new()?;
            Ok(ExitCode::from(provision_with_output(
                &ctx, &mut host, renderer,
            )))
        }
        Commands::Status => {
            let ctx = ProvisionContext::new(layout, config, ShellFolders::detect())?;
            print_status_report(&ctx, renderer)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::ShowConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Explicit `--config` must exist; the default file is optional.
fn load_config(layout: &WorkspaceLayout, explicit: Option<&Path>) -> Result<BootstrapConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = layout.config_path();
            if !path.exists() {
                debug!(path = %path.display(), "no config file; using defaults");
                return Ok(BootstrapConfig::default());
            }
            path
        }
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    BootstrapConfig::from_toml_str(&raw)
        .with_context(|| format!("invalid config: {}", path.display()))
}

fn provision_with_output<H>(ctx: &ProvisionContext, host: &mut H, renderer: TerminalRenderer) -> u8
where
    H: Host + ?Sized,
{
    let style = renderer.style();
    renderer.print_section(&format!("Provisioning {}", ctx.layout.root().display()));
    let mut progress = renderer.start_progress("provision", StageId::ALL.len() as u64);

    let report = run_provision(ctx, host, |event| match event {
        StageEvent::Started(stage) => progress.set_message(stage.as_str()),
        StageEvent::Finished(outcome) => {
            progress.println(&format_stage_outcome_line(&outcome, style));
            progress.set(u64::from(outcome.stage.ordinal()));
        }
    });

    match &report.failure {
        None => progress.finish_success(),
        Some(failure) => {
            progress.finish_abandon();
            for line in format_failure_lines(failure, style) {
                eprintln!("{line}");
            }
        }
    }

    let finished_at_unix = current_unix_timestamp().unwrap_or_default();
    if let Err(err) = write_run_journal(&ctx.layout, &report.run_journal(finished_at_unix)) {
        warn!("failed to record run journal: {err:#}");
        renderer.print_status("warn", &format!("run journal not written: {err:#}"));
    }

    if report.failure.is_none() {
        renderer.print_status("ok", "local OCR stack is installed and verified");
    }
    report.exit_status()
}

fn collect_stage_status(ctx: &ProvisionContext) -> Vec<(StageId, Result<bool, String>)> {
    StageId::ALL
        .into_iter()
        .map(|stage| {
            let state = stage_satisfied(ctx, stage).map_err(|err| format!("{err:#}"));
            (stage, state)
        })
        .collect()
}

fn print_status_report(ctx: &ProvisionContext, renderer: TerminalRenderer) -> Result<()> {
    let style = renderer.style();
    renderer.print_section(&format!("Status of {}", ctx.layout.root().display()));
    renderer.print_lines(&format_stage_status_lines(
        &collect_stage_status(ctx),
        style,
    ));

    let journal = read_run_journal(&ctx.layout)?;
    renderer.print_lines(&format_run_journal_lines(journal.as_ref(), style));
    Ok(())
}

#[cfg(test)]
mod tests;
