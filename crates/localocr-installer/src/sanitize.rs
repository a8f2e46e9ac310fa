use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::fs_utils::{is_file, remove_file_if_exists};
use crate::host::{Host, KillOutcome};
use crate::layout::WorkspaceLayout;
use crate::shortcuts::{remove_installer_shortcuts, restore_backups, BackupSlot, ShellFolders};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    pub terminated: Vec<String>,
    pub removed_shortcuts: Vec<PathBuf>,
    pub restored_shortcuts: Vec<PathBuf>,
    pub path_entry_removed: bool,
}

/// Reverts what the daemon installer does beyond placing files: the process it
/// auto-starts, its startup/menu shortcuts and its user PATH entry. Absent
/// targets are no-ops; any other failure is returned because the machine is
/// then in a half-sanitized state.
pub fn sanitize_installer_side_effects<H>(
    host: &mut H,
    process_names: &[String],
    shell_folders: Option<&ShellFolders>,
    shortcut_name: &str,
    backups: &[BackupSlot],
    install_dir: &Path,
) -> Result<SanitizeReport>
where
    H: Host + ?Sized,
{
    let mut report = SanitizeReport::default();

    for name in process_names {
        let outcome = host
            .kill_by_name(name)
            .with_context(|| format!("failed to stop installer-launched process '{name}'"))?;
        if outcome == KillOutcome::Terminated {
            info!(process = %name, "stopped process launched by installer");
            report.terminated.push(name.clone());
        }
    }

    match shell_folders {
        Some(folders) => {
            report.removed_shortcuts = remove_installer_shortcuts(folders, shortcut_name)?;
            report.restored_shortcuts = restore_backups(backups)?;
        }
        None => {
            warn!("shell folders unavailable; skipped installer shortcut cleanup");
        }
    }

    if let Some(current) = host.read_user_path()? {
        if let Some(updated) = remove_path_entry(&current, install_dir) {
            host.write_user_path(&updated)
                .context("failed to remove installer entry from user PATH")?;
            info!(dir = %install_dir.display(), "removed installer directory from user PATH");
            report.path_entry_removed = true;
        } else {
            debug!("user PATH has no installer entry");
        }
    }

    Ok(report)
}

/// Records that the daemon installer is about to run into `install_dir`. Until
/// [`clear_sanitize_pending`] removes it, a later run must sanitize before
/// anything else, because the installer may have left side effects behind.
pub fn mark_sanitize_pending(layout: &WorkspaceLayout, install_dir: &Path) -> Result<()> {
    let path = layout.sanitize_pending_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, format!("install_dir={}\n", install_dir.display()))
        .with_context(|| format!("failed to write {}", path.display()))
}

pub fn sanitize_pending(layout: &WorkspaceLayout) -> bool {
    is_file(&layout.sanitize_pending_path())
}

pub fn clear_sanitize_pending(layout: &WorkspaceLayout) -> Result<bool> {
    let path = layout.sanitize_pending_path();
    remove_file_if_exists(&path).with_context(|| format!("failed to remove {}", path.display()))
}

/// Drops every `;`-separated entry naming `dir`. Matching ignores ASCII case,
/// quotes, separator style and trailing separators. `None` when nothing matched.
pub fn remove_path_entry(raw: &str, dir: &Path) -> Option<String> {
    let target = normalize_path_entry(&dir.display().to_string());
    if target.is_empty() {
        return None;
    }

    let mut removed = false;
    let kept = raw
        .split(';')
        .filter(|entry| {
            let matches = normalize_path_entry(entry) == target;
            removed |= matches;
            !matches
        })
        .collect::<Vec<_>>();

    removed.then(|| kept.join(";"))
}

fn normalize_path_entry(entry: &str) -> String {
    entry
        .trim()
        .trim_matches('"')
        .replace('/', "\\")
        .trim_end_matches('\\')
        .to_ascii_lowercase()
}

pub fn build_kill_command(process_name: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("taskkill");
        command.arg("/F").arg("/IM").arg(process_name);
        command
    } else {
        let mut command = Command::new("pkill");
        command.arg("-x").arg(process_name);
        command
    }
}

/// `taskkill` exits 128 and `pkill` exits 1 when nothing matched. Any other
/// nonzero code is a real failure (`None`).
pub fn classify_kill_exit(code: Option<i32>, windows: bool) -> Option<KillOutcome> {
    match (code, windows) {
        (Some(0), _) => Some(KillOutcome::Terminated),
        (Some(128), true) => Some(KillOutcome::NotRunning),
        (Some(1), false) => Some(KillOutcome::NotRunning),
        _ => None,
    }
}
