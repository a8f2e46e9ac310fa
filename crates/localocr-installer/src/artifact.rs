use anyhow::{anyhow, Context, Result};
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::fs_utils::{is_file, remove_dir_if_exists, remove_file_if_exists};

/// Extracts the runtime archive into `dst`, checks that `expected_binary` came out
/// of it, then deletes the archive.
pub fn extract_runtime_archive_with_runner<RunCommand>(
    archive_path: &Path,
    dst: &Path,
    expected_binary: &Path,
    mut run: RunCommand,
) -> Result<()>
where
    RunCommand: FnMut(&mut Command, &str) -> Result<()>,
{
    if !is_file(archive_path) {
        return Err(anyhow!(
            "runtime archive not found: {}",
            archive_path.display()
        ));
    }

    // A directory without its binary is debris from a half-finished extraction.
    if !is_file(expected_binary)
        && remove_dir_if_exists(dst)
            .with_context(|| format!("failed to clear partial install: {}", dst.display()))?
    {
        info!(dir = %dst.display(), "removed partial runtime directory");
    }
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;

    extract_zip_with_runner(archive_path, dst, &mut run)?;
    verify_installed_binary(expected_binary, "runtime archive extraction")?;

    remove_file_if_exists(archive_path).with_context(|| {
        format!(
            "failed to remove runtime archive: {}",
            archive_path.display()
        )
    })?;
    Ok(())
}

pub(crate) fn extract_zip_with_runner<RunCommand>(
    archive_path: &Path,
    dst: &Path,
    run: &mut RunCommand,
) -> Result<()>
where
    RunCommand: FnMut(&mut Command, &str) -> Result<()>,
{
    let mut attempts = Vec::new();
    for (mut command, context) in build_zip_extract_commands(archive_path, dst) {
        match run(&mut command, context) {
            Ok(()) => return Ok(()),
            Err(err) => {
                debug!(context, "zip extraction attempt failed: {err:#}");
                attempts.push(format!("{err:#}"));
            }
        }
    }

    Err(anyhow!(
        "failed to extract {} into {}: {}",
        archive_path.display(),
        dst.display(),
        attempts.join("; ")
    ))
}

pub(crate) fn build_zip_extract_commands(
    archive_path: &Path,
    dst: &Path,
) -> Vec<(Command, &'static str)> {
    let mut commands = Vec::new();
    if cfg!(windows) {
        let mut command = Command::new("powershell");
        command.arg("-NoProfile").arg("-Command").arg(format!(
            "Expand-Archive -LiteralPath '{}' -DestinationPath '{}' -Force",
            escape_ps_single_quote(archive_path),
            escape_ps_single_quote(dst)
        ));
        commands.push((command, "failed to extract zip archive with powershell"));
    }

    let mut unzip_command = Command::new("unzip");
    unzip_command
        .arg("-o")
        .arg("-q")
        .arg(archive_path)
        .arg("-d")
        .arg(dst);
    commands.push((unzip_command, "failed to extract zip archive with unzip"));

    let mut tar_command = Command::new("tar");
    tar_command
        .arg("-xf")
        .arg(archive_path)
        .arg("-C")
        .arg(dst);
    commands.push((tar_command, "failed to extract zip archive with tar fallback"));
    commands
}

/// Runs a third-party installer unattended into `target_dir`. A zero exit code is
/// not proof of a usable install; callers follow up with [`verify_installed_binary`].
pub fn run_installer_silently_with_runner<RunCommand>(
    installer_path: &Path,
    target_dir: &Path,
    flags: &[String],
    mut run: RunCommand,
) -> Result<()>
where
    RunCommand: FnMut(&mut Command, &str) -> Result<()>,
{
    if !is_file(installer_path) {
        return Err(anyhow!(
            "installer not found: {}",
            installer_path.display()
        ));
    }

    let mut command = build_installer_command(installer_path, target_dir, flags);
    info!(installer = %installer_path.display(), target = %target_dir.display(), "running installer");
    run(&mut command, "third-party installer exited unsuccessfully")
}

pub(crate) fn build_installer_command(
    installer_path: &Path,
    target_dir: &Path,
    flags: &[String],
) -> Command {
    let mut command = Command::new(installer_path);
    command
        .args(flags)
        .arg(format!("/DIR={}", target_dir.display()));
    command
}

pub fn verify_installed_binary(path: &Path, step: &str) -> Result<()> {
    if is_file(path) {
        return Ok(());
    }
    warn!(path = %path.display(), step, "expected binary missing");
    Err(anyhow!(
        "{step} reported success but {} does not exist",
        path.display()
    ))
}

pub(crate) fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

pub(crate) fn escape_ps_single_quote(path: &Path) -> String {
    let mut os = OsString::new();
    os.push(path.as_os_str());
    os.to_string_lossy().replace('\'', "''")
}
