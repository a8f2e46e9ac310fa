use anyhow::{anyhow, Result};
use localocr_core::ModelRef;
use std::net::SocketAddr;
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

use crate::host::{terminate_daemon, Host};
use crate::layout::WorkspaceLayout;

pub fn build_serve_command(layout: &WorkspaceLayout, bind: SocketAddr) -> Command {
    let mut command = Command::new(layout.ollama_exe());
    command.arg("serve");
    apply_daemon_env(&mut command, layout, bind);
    command
}

pub fn build_pull_command(layout: &WorkspaceLayout, bind: SocketAddr, model: &ModelRef) -> Command {
    let mut command = Command::new(layout.ollama_exe());
    command.arg("pull").arg(model.to_string());
    apply_daemon_env(&mut command, layout, bind);
    command
}

fn apply_daemon_env(command: &mut Command, layout: &WorkspaceLayout, bind: SocketAddr) {
    command
        .current_dir(layout.root())
        .env("OLLAMA_HOST", bind.to_string())
        .env("OLLAMA_MODELS", layout.models_dir());
}

/// Starts the daemon on `bind`, waits `settle`, pulls `model`, and tears the
/// daemon down before looking at the pull result.
pub fn verify_model_pull<H>(
    host: &mut H,
    layout: &WorkspaceLayout,
    model: &ModelRef,
    bind: SocketAddr,
    settle: Duration,
) -> Result<()>
where
    H: Host + ?Sized,
{
    let process_name = daemon_process_name(layout);
    let mut serve = build_serve_command(layout, bind);
    let daemon = match host.spawn_daemon(&mut serve, &process_name) {
        Ok(daemon) => daemon,
        Err(err) => {
            if let Err(kill_err) = host.kill_by_name(&process_name) {
                warn!(process = %process_name, "failed to clean up after daemon spawn failure: {kill_err:#}");
            }
            return Err(err.context("failed to start serving daemon for model pull"));
        }
    };

    host.settle(settle);
    info!(model = %model, %bind, "pulling model");
    let mut pull = build_pull_command(layout, bind, model);
    let pull_result = host.run(&mut pull, &format!("failed to pull model '{model}'"));

    let teardown_result = terminate_daemon(host, daemon);

    match (pull_result, teardown_result) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(pull_err), Ok(())) => Err(pull_err),
        (Ok(()), Err(teardown_err)) => Err(teardown_err),
        (Err(pull_err), Err(teardown_err)) => Err(anyhow!(
            "{pull_err:#}; additionally failed to stop serving daemon: {teardown_err:#}"
        )),
    }
}

fn daemon_process_name(layout: &WorkspaceLayout) -> String {
    layout
        .ollama_exe()
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("ollama.exe")
        .to_string()
}
