mod artifact;
mod fetch;
mod fs_utils;
mod host;
mod journal;
mod layout;
mod requirements;
mod runtime_config;
mod sanitize;
mod shortcuts;
mod verify;

pub use artifact::{
    extract_runtime_archive_with_runner, run_installer_silently_with_runner,
    verify_installed_binary,
};
pub use fetch::{download_to_path, fetch_artifact_with_transport, part_path, sha256_file};
pub use fs_utils::remove_file_if_exists;
pub use host::{terminate_daemon, DaemonHandle, Host, KillOutcome, SystemHost};
pub use journal::{
    current_unix_timestamp, read_run_journal, write_run_journal, RunJournal, RunResult,
};
pub use layout::WorkspaceLayout;
pub use requirements::{
    installed_distributions, missing_requirements, normalize_distribution_name,
    parse_requirement_names, MarkerEnv,
};
pub use runtime_config::{
    enable_site_import, find_runtime_path_config, patch_runtime_path_config,
    runtime_path_config_enabled, site_import_enabled,
};
pub use sanitize::{
    build_kill_command, classify_kill_exit, clear_sanitize_pending, mark_sanitize_pending,
    remove_path_entry, sanitize_installer_side_effects, sanitize_pending, SanitizeReport,
};
pub use shortcuts::{
    pending_backups, recover_pending_backups, remove_installer_shortcuts, restore_backups,
    snapshot_shortcuts, BackupSlot, ShellFolders, ShortcutLocation,
};
pub use verify::{build_pull_command, build_serve_command, verify_model_pull};
