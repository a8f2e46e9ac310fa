use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::fs_utils::{move_file_or_copy, remove_file_if_exists};

/// Per-user shell folders the daemon installer drops shortcuts into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellFolders {
    pub startup_dir: PathBuf,
    pub programs_dir: PathBuf,
}

impl ShellFolders {
    pub fn from_appdata(appdata: &Path) -> Self {
        let programs_dir = appdata
            .join("Microsoft")
            .join("Windows")
            .join("Start Menu")
            .join("Programs");
        Self {
            startup_dir: programs_dir.join("Startup"),
            programs_dir,
        }
    }

    pub fn detect() -> Option<Self> {
        if !cfg!(windows) {
            return None;
        }
        let appdata = std::env::var_os("APPDATA").map(PathBuf::from)?;
        Some(Self::from_appdata(&appdata))
    }

    pub fn shortcut_path(&self, location: ShortcutLocation, shortcut_name: &str) -> PathBuf {
        match location {
            ShortcutLocation::Startup => self.startup_dir.join(shortcut_name),
            ShortcutLocation::Menu => self.programs_dir.join(shortcut_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutLocation {
    Startup,
    Menu,
}

impl ShortcutLocation {
    pub const ALL: [ShortcutLocation; 2] = [Self::Startup, Self::Menu];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Menu => "menu",
        }
    }
}

/// A user shortcut that existed before the installer ran, copied aside.
/// Restoring moves the copy back, so a slot is restored at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSlot {
    pub location: ShortcutLocation,
    pub original: PathBuf,
    pub backup: PathBuf,
}

impl BackupSlot {
    fn project(
        folders: &ShellFolders,
        location: ShortcutLocation,
        shortcut_name: &str,
        backups_dir: &Path,
    ) -> Self {
        Self {
            location,
            original: folders.shortcut_path(location, shortcut_name),
            backup: backups_dir.join(location.as_str()).join(shortcut_name),
        }
    }
}

/// Copies aside every pre-existing shortcut the installer is known to overwrite.
/// Locations with no shortcut get no slot.
pub fn snapshot_shortcuts(
    folders: &ShellFolders,
    shortcut_name: &str,
    backups_dir: &Path,
) -> Result<Vec<BackupSlot>> {
    let mut slots = Vec::new();
    for location in ShortcutLocation::ALL {
        let slot = BackupSlot::project(folders, location, shortcut_name, backups_dir);
        match fs::symlink_metadata(&slot.original) {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => continue,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to inspect shortcut: {}", slot.original.display())
                });
            }
        }

        if let Some(parent) = slot.backup.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::copy(&slot.original, &slot.backup).with_context(|| {
            format!(
                "failed to back up shortcut {} to {}",
                slot.original.display(),
                slot.backup.display()
            )
        })?;
        debug!(location = location.as_str(), path = %slot.original.display(), "backed up shortcut");
        slots.push(slot);
    }
    Ok(slots)
}

/// Deletes the installer's shortcuts from both locations; absent files are fine.
pub fn remove_installer_shortcuts(
    folders: &ShellFolders,
    shortcut_name: &str,
) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for location in ShortcutLocation::ALL {
        let path = folders.shortcut_path(location, shortcut_name);
        if remove_file_if_exists(&path)
            .with_context(|| format!("failed to remove installer shortcut: {}", path.display()))?
        {
            info!(location = location.as_str(), path = %path.display(), "removed installer shortcut");
            removed.push(path);
        }
    }
    Ok(removed)
}

/// Moves each backup over its original location. Slots whose backup is already
/// gone were restored earlier and are skipped.
pub fn restore_backups(slots: &[BackupSlot]) -> Result<Vec<PathBuf>> {
    let mut restored = Vec::new();
    for slot in slots {
        if !slot.backup.exists() {
            warn!(backup = %slot.backup.display(), "shortcut backup already consumed");
            continue;
        }
        move_file_or_copy(&slot.backup, &slot.original).with_context(|| {
            format!(
                "failed to restore shortcut {} from {}",
                slot.original.display(),
                slot.backup.display()
            )
        })?;
        info!(location = slot.location.as_str(), path = %slot.original.display(), "restored user shortcut");
        restored.push(slot.original.clone());
    }
    Ok(restored)
}

/// Slots whose backup is still on disk.
pub fn pending_backups(
    folders: &ShellFolders,
    shortcut_name: &str,
    backups_dir: &Path,
) -> Vec<BackupSlot> {
    ShortcutLocation::ALL
        .into_iter()
        .map(|location| BackupSlot::project(folders, location, shortcut_name, backups_dir))
        .filter(|slot| slot.backup.is_file())
        .collect()
}

/// Backups still on disk belong to a run that stopped between snapshot and
/// restore; they hold the user's pre-installer state and win over whatever
/// currently sits at the original location.
pub fn recover_pending_backups(
    folders: &ShellFolders,
    shortcut_name: &str,
    backups_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let pending = pending_backups(folders, shortcut_name, backups_dir);
    if !pending.is_empty() {
        warn!(
            count = pending.len(),
            "restoring shortcut backups left by an interrupted run"
        );
    }
    restore_backups(&pending)
}
