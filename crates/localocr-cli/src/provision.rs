use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use localocr_core::{
    BootstrapConfig, ModelRef, ProvisionError, StageFailure, StageId, StageOutcome, StageStatus,
};
use localocr_installer::{
    clear_sanitize_pending, extract_runtime_archive_with_runner, fetch_artifact_with_transport,
    find_runtime_path_config, mark_sanitize_pending, missing_requirements,
    patch_runtime_path_config, pending_backups, recover_pending_backups, remove_file_if_exists,
    run_installer_silently_with_runner, runtime_path_config_enabled,
    sanitize_installer_side_effects, sanitize_pending, snapshot_shortcuts,
    verify_installed_binary, verify_model_pull, Host, MarkerEnv, RunJournal, RunResult,
    ShellFolders, WorkspaceLayout,
};
use tracing::{debug, info, warn};

/// The immutable inputs of one provisioning run. Every stage reads from this and
/// nothing else; there is no ambient working directory.
#[derive(Debug, Clone)]
pub(crate) struct ProvisionContext {
    pub(crate) layout: WorkspaceLayout,
    pub(crate) config: BootstrapConfig,
    pub(crate) model: ModelRef,
    pub(crate) bind: SocketAddr,
    pub(crate) shell_folders: Option<ShellFolders>,
    pub(crate) marker_env: MarkerEnv,
}

impl ProvisionContext {
    pub(crate) fn new(
        layout: WorkspaceLayout,
        config: BootstrapConfig,
        shell_folders: Option<ShellFolders>,
    ) -> Result<Self> {
        config.validate()?;
        let model = config.model.model_ref()?;
        let bind = config.model.bind_addr()?;
        Ok(Self {
            layout,
            config,
            model,
            bind,
            shell_folders,
            marker_env: MarkerEnv::host(),
        })
    }

    pub(crate) fn requirements_path(&self) -> PathBuf {
        self.layout
            .requirements_path(&self.config.packages.requirements)
    }

    pub(crate) fn model_manifest_path(&self) -> PathBuf {
        self.layout.model_manifest_path(&self.model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StageEvent {
    Started(StageId),
    Finished(StageOutcome),
}

#[derive(Debug)]
pub(crate) struct ProvisionReport {
    pub(crate) outcomes: Vec<StageOutcome>,
    pub(crate) failure: Option<StageFailure>,
}

impl ProvisionReport {
    pub(crate) fn exit_status(&self) -> u8 {
        if self.failure.is_some() {
            1
        } else {
            0
        }
    }

    pub(crate) fn run_journal(&self, finished_at_unix: u64) -> RunJournal {
        let result = match &self.failure {
            None => RunResult::Succeeded,
            Some(failure) => RunResult::Failed {
                class: failure.error.class().to_string(),
            },
        };
        RunJournal {
            outcomes: self.outcomes.clone(),
            result,
            finished_at_unix,
        }
    }
}

#[derive(Debug)]
enum SequencerState {
    Start,
    Running(StageId),
    Done,
    Failed(StageFailure),
}

/// Runs the six stages in order. The first failure is terminal: later stages are
/// never attempted and the failure is returned with the stage it belongs to.
pub(crate) fn run_provision<H, Observe>(
    ctx: &ProvisionContext,
    host: &mut H,
    mut observe: Observe,
) -> ProvisionReport
where
    H: Host + ?Sized,
    Observe: FnMut(StageEvent),
{
    let mut outcomes = Vec::with_capacity(StageId::ALL.len());
    let mut state = SequencerState::Start;

    loop {
        state = match state {
            SequencerState::Start => match ctx.layout.ensure_base_dirs() {
                Ok(()) => SequencerState::Running(StageId::first()),
                Err(err) => SequencerState::Failed(StageFailure {
                    stage: StageId::first(),
                    error: ProvisionError::Unexpected(err),
                }),
            },
            SequencerState::Running(stage) => {
                observe(StageEvent::Started(stage));
                let result = run_stage(ctx, host, stage);
                let status = match &result {
                    Ok(status) => *status,
                    Err(_) => StageStatus::Failed,
                };
                let outcome = StageOutcome { stage, status };
                outcomes.push(outcome);
                observe(StageEvent::Finished(outcome));

                match result {
                    Ok(_) => stage
                        .next()
                        .map_or(SequencerState::Done, SequencerState::Running),
                    Err(error) => SequencerState::Failed(StageFailure { stage, error }),
                }
            }
            SequencerState::Done => {
                return ProvisionReport {
                    outcomes,
                    failure: None,
                };
            }
            SequencerState::Failed(failure) => {
                warn!(stage = %failure.stage, class = failure.error.class(), "provisioning halted");
                return ProvisionReport {
                    outcomes,
                    failure: Some(failure),
                };
            }
        };
    }
}

fn run_stage<H>(
    ctx: &ProvisionContext,
    host: &mut H,
    stage: StageId,
) -> Result<StageStatus, ProvisionError>
where
    H: Host + ?Sized,
{
    if stage == StageId::ServingDaemon {
        finish_interrupted_install(ctx, host).map_err(ProvisionError::ThirdPartyInstall)?;
    }

    if stage_satisfied(ctx, stage).map_err(ProvisionError::Unexpected)? {
        info!(stage = %stage, "already satisfied");
        return Ok(StageStatus::Skipped);
    }

    info!(stage = %stage, "installing");
    match stage {
        StageId::Runtime => install_runtime(ctx, host)?,
        StageId::PathConfig => enable_runtime_site_packages(ctx)?,
        StageId::InstallerTool => install_installer_tool(ctx, host)?,
        StageId::Packages => install_packages(ctx, host)?,
        StageId::ServingDaemon => install_serving_daemon(ctx, host)?,
        StageId::Model => pull_model(ctx, host)?,
    }
    Ok(StageStatus::Succeeded)
}

/// Whether the functional artifact of `stage` is already present. Reads only.
pub(crate) fn stage_satisfied(ctx: &ProvisionContext, stage: StageId) -> Result<bool> {
    let layout = &ctx.layout;
    match stage {
        StageId::Runtime => Ok(layout.python_exe().is_file()),
        StageId::PathConfig => runtime_path_config_enabled(&layout.python_dir()),
        StageId::InstallerTool => Ok(layout.pip_entry_point().is_file()),
        StageId::Packages => {
            let missing = missing_requirements(
                &ctx.requirements_path(),
                &layout.site_packages_dir(),
                &ctx.marker_env,
            )?;
            if !missing.is_empty() {
                debug!(missing = %missing.join(","), "packages not yet installed");
            }
            Ok(missing.is_empty())
        }
        StageId::ServingDaemon => Ok(layout.ollama_exe().is_file()),
        StageId::Model => Ok(ctx.model_manifest_path().is_file()),
    }
}

fn fetch_payload<H>(
    host: &mut H,
    url: &str,
    dest: &Path,
    expected_sha256: Option<&str>,
) -> Result<(), ProvisionError>
where
    H: Host + ?Sized,
{
    fetch_artifact_with_transport(url, dest, expected_sha256, |url, out| host.fetch(url, out))
        .map_err(ProvisionError::Network)
}

fn install_runtime<H>(ctx: &ProvisionContext, host: &mut H) -> Result<(), ProvisionError>
where
    H: Host + ?Sized,
{
    let layout = &ctx.layout;
    let archive = layout.runtime_archive_path();
    fetch_payload(
        host,
        &ctx.config.runtime.url,
        &archive,
        ctx.config.runtime.sha256.as_deref(),
    )?;
    extract_runtime_archive_with_runner(
        &archive,
        &layout.python_dir(),
        &layout.python_exe(),
        |command, context| host.run(command, context),
    )
    .map_err(ProvisionError::Extract)
}

fn enable_runtime_site_packages(ctx: &ProvisionContext) -> Result<(), ProvisionError> {
    let python_dir = ctx.layout.python_dir();
    let Some(path_config) =
        find_runtime_path_config(&python_dir).map_err(ProvisionError::Extract)?
    else {
        return Err(ProvisionError::Unexpected(anyhow!(
            "runtime path configuration (python*._pth) not found in {}",
            python_dir.display()
        )));
    };
    let changed = patch_runtime_path_config(&path_config).map_err(ProvisionError::Extract)?;
    debug!(path = %path_config.display(), changed, "runtime path configuration patched");
    Ok(())
}

fn install_installer_tool<H>(ctx: &ProvisionContext, host: &mut H) -> Result<(), ProvisionError>
where
    H: Host + ?Sized,
{
    let layout = &ctx.layout;
    let script = layout.pip_bootstrap_path();
    fetch_payload(
        host,
        &ctx.config.installer_tool.url,
        &script,
        ctx.config.installer_tool.sha256.as_deref(),
    )?;

    let mut command = Command::new(layout.python_exe());
    command
        .arg(&script)
        .arg("--no-warn-script-location")
        .current_dir(layout.root());
    host.run(&mut command, "pip bootstrap exited unsuccessfully")
        .map_err(ProvisionError::PackageInstall)?;

    remove_file_if_exists(&script)
        .with_context(|| format!("failed to remove {}", script.display()))
        .map_err(ProvisionError::PackageInstall)?;
    verify_installed_binary(&layout.pip_entry_point(), "pip bootstrap")
        .map_err(ProvisionError::PackageInstall)
}

fn install_packages<H>(ctx: &ProvisionContext, host: &mut H) -> Result<(), ProvisionError>
where
    H: Host + ?Sized,
{
    let layout = &ctx.layout;
    let requirements = ctx.requirements_path();
    let mut command = Command::new(layout.python_exe());
    command
        .args(["-m", "pip", "install", "--no-warn-script-location", "-r"])
        .arg(&requirements)
        .current_dir(layout.root());
    host.run(&mut command, "package installation exited unsuccessfully")
        .map_err(ProvisionError::PackageInstall)?;

    let missing = missing_requirements(&requirements, &layout.site_packages_dir(), &ctx.marker_env)
        .map_err(ProvisionError::PackageInstall)?;
    if !missing.is_empty() {
        return Err(ProvisionError::PackageInstall(anyhow!(
            "pip reported success but packages are still missing: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// A previous run that stopped while the daemon installer was in flight left its
/// side effects in place. Revert them before stage 5 checks for `ollama.exe`,
/// which the installer may already have written.
fn finish_interrupted_install<H>(ctx: &ProvisionContext, host: &mut H) -> Result<()>
where
    H: Host + ?Sized,
{
    let layout = &ctx.layout;
    if !sanitize_pending(layout) {
        return recover_shortcut_backups(ctx);
    }

    warn!("daemon installer did not finish in a previous run; reverting its side effects");
    let daemon = &ctx.config.daemon;
    let backups = match &ctx.shell_folders {
        Some(folders) => pending_backups(
            folders,
            &daemon.shortcut_name,
            &layout.shortcut_backups_dir(),
        ),
        None => Vec::new(),
    };
    let report = sanitize_installer_side_effects(
        host,
        &daemon.process_names,
        ctx.shell_folders.as_ref(),
        &daemon.shortcut_name,
        &backups,
        &layout.ollama_dir(),
    )
    .context("failed to sanitize side effects of an interrupted install")?;
    debug!(?report, "interrupted install sanitized");
    clear_sanitize_pending(layout)?;

    let installer = layout.daemon_installer_path();
    if remove_file_if_exists(&installer)
        .with_context(|| format!("failed to remove {}", installer.display()))?
    {
        info!(path = %installer.display(), "removed installer left by interrupted run");
    }
    Ok(())
}

fn recover_shortcut_backups(ctx: &ProvisionContext) -> Result<()> {
    let Some(folders) = &ctx.shell_folders else {
        return Ok(());
    };
    let restored = recover_pending_backups(
        folders,
        &ctx.config.daemon.shortcut_name,
        &ctx.layout.shortcut_backups_dir(),
    )?;
    for path in restored {
        info!(path = %path.display(), "restored shortcut from interrupted run");
    }
    Ok(())
}

fn install_serving_daemon<H>(ctx: &ProvisionContext, host: &mut H) -> Result<(), ProvisionError>
where
    H: Host + ?Sized,
{
    let layout = &ctx.layout;
    let daemon = &ctx.config.daemon;
    let installer = layout.daemon_installer_path();
    let install_dir = layout.ollama_dir();
    fetch_payload(host, &daemon.installer_url, &installer, daemon.sha256.as_deref())?;

    let backups = match &ctx.shell_folders {
        Some(folders) => snapshot_shortcuts(
            folders,
            &daemon.shortcut_name,
            &layout.shortcut_backups_dir(),
        )
        .map_err(ProvisionError::ThirdPartyInstall)?,
        None => Vec::new(),
    };

    mark_sanitize_pending(layout, &install_dir).map_err(ProvisionError::ThirdPartyInstall)?;
    let install_result = run_installer_silently_with_runner(
        &installer,
        &install_dir,
        &daemon.installer_flags,
        |command, context| host.run(command, context),
    );
    // The installer may have left side effects even when it failed.
    let sanitize_result = sanitize_installer_side_effects(
        host,
        &daemon.process_names,
        ctx.shell_folders.as_ref(),
        &daemon.shortcut_name,
        &backups,
        &install_dir,
    )
    .and_then(|report| {
        clear_sanitize_pending(layout)?;
        Ok(report)
    });

    match (install_result, sanitize_result) {
        (Ok(()), Ok(report)) => {
            debug!(?report, "installer side effects sanitized");
        }
        (Err(install_err), Ok(_)) => return Err(ProvisionError::ThirdPartyInstall(install_err)),
        (Ok(()), Err(sanitize_err)) => {
            return Err(ProvisionError::ThirdPartyInstall(
                sanitize_err.context("failed to sanitize installer side effects"),
            ));
        }
        (Err(install_err), Err(sanitize_err)) => {
            return Err(ProvisionError::ThirdPartyInstall(anyhow!(
                "{install_err:#}; additionally failed to sanitize installer side effects: {sanitize_err:#}"
            )));
        }
    }

    verify_installed_binary(&layout.ollama_exe(), "Ollama installer")
        .map_err(ProvisionError::ThirdPartyInstall)?;
    remove_file_if_exists(&installer)
        .with_context(|| format!("failed to remove {}", installer.display()))
        .map_err(ProvisionError::ThirdPartyInstall)?;
    Ok(())
}

fn pull_model<H>(ctx: &ProvisionContext, host: &mut H) -> Result<(), ProvisionError>
where
    H: Host + ?Sized,
{
    let layout = &ctx.layout;
    let models_dir = layout.models_dir();
    fs::create_dir_all(&models_dir)
        .with_context(|| format!("failed to create {}", models_dir.display()))
        .map_err(ProvisionError::ModelPull)?;

    verify_model_pull(
        host,
        layout,
        &ctx.model,
        ctx.bind,
        ctx.config.model.settle_interval(),
    )
    .map_err(ProvisionError::ModelPull)?;

    let manifest = ctx.model_manifest_path();
    if !manifest.is_file() {
        return Err(ProvisionError::ModelPull(anyhow!(
            "pull of '{}' reported success but no manifest exists at {}",
            ctx.model,
            manifest.display()
        )));
    }
    Ok(())
}
