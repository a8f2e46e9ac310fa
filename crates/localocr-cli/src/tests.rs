use super::*;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use localocr_core::{ProvisionError, StageOutcome, StageStatus};
use localocr_installer::{
    mark_sanitize_pending, parse_requirement_names, sanitize_pending, DaemonHandle, KillOutcome,
    MarkerEnv, RunResult,
};

use crate::provision::ProvisionReport;
use crate::render::{render_status_line, resolve_output_style, OutputStyle};

static TEST_LAYOUT_COUNTER: AtomicU64 = AtomicU64::new(0);

const REQUIREMENTS: &str = "PySide6>=6.6\nPyMuPDF\nollama==0.6.0\npillow_heif\n";

fn test_layout() -> WorkspaceLayout {
    let mut path = std::env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_LAYOUT_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.push(format!(
        "localocr-cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    WorkspaceLayout::new(path)
}

fn test_context() -> ProvisionContext {
    let layout = test_layout();
    fs::create_dir_all(layout.root()).expect("must create root");
    fs::write(layout.requirements_path("requirements.txt"), REQUIREMENTS)
        .expect("must write requirements");
    let folders = ShellFolders::from_appdata(&layout.root().join("appdata"));
    fs::create_dir_all(&folders.startup_dir).expect("must create startup dir");
    let mut ctx = ProvisionContext::new(layout, BootstrapConfig::default(), Some(folders))
        .expect("default config is valid");
    ctx.marker_env = MarkerEnv::for_os("windows");
    ctx
}

fn folders(ctx: &ProvisionContext) -> &ShellFolders {
    ctx.shell_folders.as_ref().expect("test context has folders")
}

fn startup_shortcut(ctx: &ProvisionContext) -> PathBuf {
    folders(ctx).startup_dir.join("Ollama.lnk")
}

fn menu_shortcut(ctx: &ProvisionContext) -> PathBuf {
    folders(ctx).programs_dir.join("Ollama.lnk")
}

/// Plays the part of the network, the archive tools, Python, pip, the Ollama
/// installer and the daemon, writing the files each would leave behind.
#[derive(Default)]
struct FakeHost {
    layout: Option<WorkspaceLayout>,
    startup_dir: Option<PathBuf>,
    programs_dir: Option<PathBuf>,
    marker_env: Option<MarkerEnv>,
    fetched: Vec<String>,
    running: BTreeSet<String>,
    user_path: Option<String>,
    offline: bool,
    omit_path_config: bool,
    fail_installer: bool,
    fail_pull: bool,
    fail_kill: bool,
    pulls: usize,
}

impl FakeHost {
    fn for_context(ctx: &ProvisionContext) -> Self {
        Self {
            layout: Some(ctx.layout.clone()),
            startup_dir: ctx.shell_folders.as_ref().map(|f| f.startup_dir.clone()),
            programs_dir: ctx.shell_folders.as_ref().map(|f| f.programs_dir.clone()),
            marker_env: Some(ctx.marker_env.clone()),
            user_path: Some(r"C:\Windows\system32".to_string()),
            ..Self::default()
        }
    }

    fn layout(&self) -> &WorkspaceLayout {
        self.layout.as_ref().expect("fake host is bound to a layout")
    }

    fn extract_runtime(&self) -> Result<()> {
        let python_dir = self.layout().python_dir();
        fs::create_dir_all(&python_dir)?;
        fs::write(python_dir.join("python.exe"), b"MZ python")?;
        fs::write(python_dir.join("python312.zip"), b"PK stdlib")?;
        if !self.omit_path_config {
            fs::write(
                python_dir.join("python312._pth"),
                "python312.zip\r\n.\r\n\r\n# Uncomment to run site.main() automatically\r\n#import site\r\n",
            )?;
        }
        Ok(())
    }

    fn bootstrap_pip(&self) -> Result<()> {
        let scripts = self.layout().python_scripts_dir();
        fs::create_dir_all(&scripts)?;
        fs::write(scripts.join("pip.exe"), b"MZ pip")?;
        Ok(())
    }

    fn pip_install(&self, requirements: &Path) -> Result<()> {
        let contents = fs::read_to_string(requirements)?;
        let site = self.layout().site_packages_dir();
        let env = self.marker_env.clone().unwrap_or_else(MarkerEnv::host);
        for name in parse_requirement_names(&contents, &env) {
            fs::create_dir_all(site.join(format!("{}-1.0.dist-info", name.replace('-', "_"))))?;
        }
        Ok(())
    }

    fn run_installer(&mut self, args: &[String]) -> Result<()> {
        let target = args
            .iter()
            .find_map(|arg| arg.strip_prefix("/DIR="))
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("installer invoked without /DIR"))?;
        fs::create_dir_all(&target)?;

        if let Some(startup) = &self.startup_dir {
            fs::write(startup.join("Ollama.lnk"), b"installer startup shortcut")?;
        }
        if let Some(programs) = &self.programs_dir {
            fs::write(programs.join("Ollama.lnk"), b"installer menu shortcut")?;
        }
        let entry = target.display().to_string();
        self.user_path = Some(match self.user_path.take() {
            Some(existing) => format!("{existing};{entry}"),
            None => entry,
        });
        self.running.insert("ollama app.exe".to_string());

        if self.fail_installer {
            return Err(anyhow!(
                "third-party installer exited unsuccessfully: status=exit code: 5"
            ));
        }
        fs::write(target.join("ollama.exe"), b"MZ ollama")?;
        Ok(())
    }

    fn pull(&mut self, command: &Command, args: &[String], context: &str) -> Result<()> {
        self.pulls += 1;
        if !self.running.contains("ollama.exe") {
            return Err(anyhow!("{context}: could not connect to ollama server"));
        }
        if self.fail_pull {
            return Err(anyhow!("{context}: status=exit code: 1 stderr='dial tcp: lookup registry.ollama.ai: no such host'"));
        }
        let models_dir = command
            .get_envs()
            .find(|(key, _)| *key == OsStr::new("OLLAMA_MODELS"))
            .and_then(|(_, value)| value)
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("OLLAMA_MODELS not set"))?;
        let (name, tag) = args[1]
            .split_once(':')
            .ok_or_else(|| anyhow!("model without tag"))?;
        let manifest = models_dir
            .join("manifests")
            .join("registry.ollama.ai")
            .join("library")
            .join(name)
            .join(tag);
        fs::create_dir_all(manifest.parent().expect("manifest parent"))?;
        fs::write(&manifest, b"{\"schemaVersion\":2}")?;
        Ok(())
    }
}

impl Host for FakeHost {
    fn fetch(&mut self, url: &str, dest: &Path) -> Result<()> {
        if self.offline {
            return Err(anyhow!("request failed: {url}"));
        }
        self.fetched.push(url.to_string());
        fs::write(dest, format!("payload of {url}"))?;
        Ok(())
    }

    fn run(&mut self, command: &mut Command, context: &str) -> Result<()> {
        let program = PathBuf::from(command.get_program());
        let args = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        let layout = self.layout().clone();

        if args.iter().any(|arg| arg.contains("python.zip")) {
            return self.extract_runtime();
        }
        if program == layout.python_exe() {
            return match args.first().map(String::as_str) {
                Some("-m") => {
                    let requirements = args.last().map(PathBuf::from).expect("-r path");
                    self.pip_install(&requirements)
                }
                _ => self.bootstrap_pip(),
            };
        }
        if program == layout.daemon_installer_path() {
            return self.run_installer(&args);
        }
        if program == layout.ollama_exe() && args.first().map(String::as_str) == Some("pull") {
            return self.pull(command, &args, context);
        }
        Err(anyhow!("{context}: unexpected command {}", program.display()))
    }

    fn spawn_daemon(&mut self, command: &mut Command, process_name: &str) -> Result<DaemonHandle> {
        let program = PathBuf::from(command.get_program());
        if !program.is_file() {
            return Err(anyhow!("failed to start {process_name}: not found"));
        }
        self.running.insert(process_name.to_string());
        Ok(DaemonHandle::untracked(process_name))
    }

    fn kill_by_name(&mut self, process_name: &str) -> Result<KillOutcome> {
        if self.fail_kill {
            return Err(anyhow!("failed to run process killer for '{process_name}': access is denied"));
        }
        if self.running.remove(process_name) {
            Ok(KillOutcome::Terminated)
        } else {
            Ok(KillOutcome::NotRunning)
        }
    }

    fn read_user_path(&mut self) -> Result<Option<String>> {
        Ok(self.user_path.clone())
    }

    fn write_user_path(&mut self, value: &str) -> Result<()> {
        self.user_path = Some(value.to_string());
        Ok(())
    }

    fn settle(&mut self, _interval: Duration) {}
}

fn provision(ctx: &ProvisionContext, host: &mut FakeHost) -> ProvisionReport {
    run_provision(ctx, host, |_| {})
}

fn statuses(report: &ProvisionReport) -> Vec<StageStatus> {
    report.outcomes.iter().map(|outcome| outcome.status).collect()
}

fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).expect("must read dir") {
            let path = entry.expect("dir entry").path();
            if path.is_dir() {
                pending.push(path.clone());
                files.insert(path, Vec::new());
            } else {
                let bytes = fs::read(&path).expect("must read file");
                files.insert(path, bytes);
            }
        }
    }
    files
}

#[test]
fn fresh_machine_provisions_every_stage() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);

    let report = provision(&ctx, &mut host);

    assert!(report.failure.is_none(), "{:?}", report.failure);
    assert_eq!(report.exit_status(), 0);
    assert_eq!(statuses(&report), vec![StageStatus::Succeeded; 6]);
    assert_eq!(
        report
            .outcomes
            .iter()
            .map(|outcome| outcome.stage)
            .collect::<Vec<_>>(),
        StageId::ALL.to_vec()
    );

    let layout = &ctx.layout;
    assert!(layout.python_exe().is_file());
    assert!(layout.pip_entry_point().is_file());
    assert!(layout.ollama_exe().is_file());
    assert!(ctx.model_manifest_path().is_file());
    let pth = fs::read_to_string(layout.python_dir().join("python312._pth")).expect("pth");
    assert!(pth.contains("\r\nimport site\r\n"));

    assert!(!layout.runtime_archive_path().exists());
    assert!(!layout.pip_bootstrap_path().exists());
    assert!(!layout.daemon_installer_path().exists());

    assert!(host.running.is_empty(), "no process may outlive the run");
    assert_eq!(host.user_path.as_deref(), Some(r"C:\Windows\system32"));
    assert!(!sanitize_pending(layout));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn second_run_skips_every_stage_and_changes_nothing() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);
    let first = provision(&ctx, &mut host);
    assert!(first.failure.is_none());
    let before = snapshot_tree(ctx.layout.root());
    let fetched_before = host.fetched.len();

    let second = provision(&ctx, &mut host);

    assert!(second.failure.is_none());
    assert_eq!(statuses(&second), vec![StageStatus::Skipped; 6]);
    assert_eq!(host.fetched.len(), fetched_before, "nothing is downloaded twice");
    assert_eq!(host.pulls, 1);
    assert_eq!(snapshot_tree(ctx.layout.root()), before);

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn sequencer_reports_each_stage_as_it_runs() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);
    let mut events = Vec::new();

    run_provision(&ctx, &mut host, |event| events.push(event));

    assert_eq!(events.len(), 12);
    assert_eq!(events[0], StageEvent::Started(StageId::Runtime));
    assert_eq!(
        events[11],
        StageEvent::Finished(StageOutcome {
            stage: StageId::Model,
            status: StageStatus::Succeeded,
        })
    );

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn preexisting_startup_shortcut_survives_byte_identical() {
    let ctx = test_context();
    let original = b"\x4c\x00\x00\x00user's own Ollama shortcut".to_vec();
    fs::write(startup_shortcut(&ctx), &original).expect("seed user shortcut");
    let mut host = FakeHost::for_context(&ctx);

    let report = provision(&ctx, &mut host);

    assert!(report.failure.is_none(), "{:?}", report.failure);
    assert_eq!(fs::read(startup_shortcut(&ctx)).expect("startup"), original);
    assert!(!menu_shortcut(&ctx).exists());
    assert!(
        fs::read_dir(ctx.layout.shortcut_backups_dir().join("startup"))
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true),
        "backup is deleted after restoration"
    );

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn no_preexisting_shortcuts_leaves_none_behind() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);

    let report = provision(&ctx, &mut host);

    assert!(report.failure.is_none());
    assert!(!startup_shortcut(&ctx).exists());
    assert!(!menu_shortcut(&ctx).exists());

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn model_pull_failure_is_fatal_and_stops_daemon() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);
    host.fail_pull = true;

    let report = provision(&ctx, &mut host);

    let failure = report.failure.as_ref().expect("pull failure must be fatal");
    assert_eq!(failure.stage, StageId::Model);
    assert_eq!(failure.error.class(), "model-pull");
    assert_eq!(report.exit_status(), 1);
    assert_eq!(
        report.outcomes.last(),
        Some(&StageOutcome {
            stage: StageId::Model,
            status: StageStatus::Failed,
        })
    );
    assert!(host.running.is_empty(), "daemon must not be left listening");

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn runtime_present_and_registry_unreachable_fails_only_at_model_stage() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);
    host.fail_pull = true;
    assert!(provision(&ctx, &mut host).failure.is_some());

    let report = provision(&ctx, &mut host);

    assert_eq!(
        statuses(&report),
        vec![
            StageStatus::Skipped,
            StageStatus::Skipped,
            StageStatus::Skipped,
            StageStatus::Skipped,
            StageStatus::Skipped,
            StageStatus::Failed,
        ]
    );
    let failure = report.failure.as_ref().expect("failure");
    assert!(matches!(failure.error, ProvisionError::ModelPull(_)));
    assert!(failure.to_string().starts_with("stage 6 (model) failed: model pull error:"));
    assert!(host.running.is_empty());

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn network_failure_halts_before_later_stages() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);
    host.offline = true;

    let report = provision(&ctx, &mut host);

    let failure = report.failure.as_ref().expect("offline run must fail");
    assert_eq!(failure.stage, StageId::Runtime);
    assert_eq!(failure.error.class(), "network");
    assert_eq!(report.outcomes.len(), 1, "no later stage is attempted");
    assert!(!ctx.layout.runtime_archive_path().exists());
    assert!(!ctx.layout.python_dir().exists());

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn missing_path_config_is_unexpected() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);
    host.omit_path_config = true;

    let report = provision(&ctx, &mut host);

    let failure = report.failure.as_ref().expect("missing ._pth must fail");
    assert_eq!(failure.stage, StageId::PathConfig);
    assert_eq!(failure.error.class(), "unexpected");

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn missing_requirements_manifest_is_unexpected() {
    let ctx = test_context();
    fs::remove_file(ctx.requirements_path()).expect("remove requirements");
    let mut host = FakeHost::for_context(&ctx);

    let report = provision(&ctx, &mut host);

    let failure = report.failure.as_ref().expect("missing manifest must fail");
    assert_eq!(failure.stage, StageId::Packages);
    assert_eq!(failure.error.class(), "unexpected");
    assert_eq!(
        statuses(&report),
        vec![
            StageStatus::Succeeded,
            StageStatus::Succeeded,
            StageStatus::Succeeded,
            StageStatus::Failed,
        ]
    );

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn failed_installer_is_still_sanitized() {
    let ctx = test_context();
    let original = b"user shortcut".to_vec();
    fs::write(startup_shortcut(&ctx), &original).expect("seed user shortcut");
    let mut host = FakeHost::for_context(&ctx);
    host.fail_installer = true;

    let report = provision(&ctx, &mut host);

    let failure = report.failure.as_ref().expect("installer failure must be fatal");
    assert_eq!(failure.stage, StageId::ServingDaemon);
    assert_eq!(failure.error.class(), "third-party-installer");
    assert!(host.running.is_empty());
    assert_eq!(fs::read(startup_shortcut(&ctx)).expect("startup"), original);
    assert!(!menu_shortcut(&ctx).exists());
    assert_eq!(host.user_path.as_deref(), Some(r"C:\Windows\system32"));
    assert!(!sanitize_pending(&ctx.layout));

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn interrupted_run_backups_are_restored_even_when_daemon_is_installed() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);
    assert!(provision(&ctx, &mut host).failure.is_none());

    let pending = ctx.layout.shortcut_backups_dir().join("startup").join("Ollama.lnk");
    fs::create_dir_all(pending.parent().expect("parent")).expect("backup dir");
    fs::write(&pending, b"user shortcut from before").expect("pending backup");
    fs::write(startup_shortcut(&ctx), b"installer startup shortcut").expect("leftover");

    let report = provision(&ctx, &mut host);

    assert!(report.failure.is_none());
    assert_eq!(report.outcomes[4].status, StageStatus::Skipped);
    assert_eq!(
        fs::read(startup_shortcut(&ctx)).expect("startup"),
        b"user shortcut from before"
    );
    assert!(!pending.exists());

    let _ = fs::remove_dir_all(ctx.layout.root());
}

/// Leaves the machine as a run killed between installer exit and sanitizing
/// would: marker set, both installer shortcuts, PATH entry, app process running.
fn seed_unsanitized_install(ctx: &ProvisionContext, host: &mut FakeHost) {
    mark_sanitize_pending(&ctx.layout, &ctx.layout.ollama_dir()).expect("marker");
    fs::write(startup_shortcut(ctx), b"installer startup shortcut").expect("startup");
    fs::write(menu_shortcut(ctx), b"installer menu shortcut").expect("menu");
    host.user_path = Some(format!(
        r"C:\Windows\system32;{}",
        ctx.layout.ollama_dir().display()
    ));
    host.running.insert("ollama app.exe".to_string());
}

#[test]
fn interrupted_install_is_sanitized_before_stage_five_is_skipped() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);
    assert!(provision(&ctx, &mut host).failure.is_none());
    seed_unsanitized_install(&ctx, &mut host);
    fs::write(ctx.layout.daemon_installer_path(), b"MZ installer").expect("leftover installer");

    let report = provision(&ctx, &mut host);

    assert!(report.failure.is_none(), "{:?}", report.failure);
    assert_eq!(report.outcomes[4].status, StageStatus::Skipped);
    assert!(!startup_shortcut(&ctx).exists());
    assert!(!menu_shortcut(&ctx).exists());
    assert_eq!(host.user_path.as_deref(), Some(r"C:\Windows\system32"));
    assert!(host.running.is_empty());
    assert!(!sanitize_pending(&ctx.layout));
    assert!(!ctx.layout.daemon_installer_path().exists());

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn interrupted_install_restores_user_shortcut_byte_identical() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);
    assert!(provision(&ctx, &mut host).failure.is_none());
    seed_unsanitized_install(&ctx, &mut host);
    let original = b"\x4c\x00\x00\x00user's own Ollama shortcut".to_vec();
    let pending = ctx.layout.shortcut_backups_dir().join("startup").join("Ollama.lnk");
    fs::create_dir_all(pending.parent().expect("parent")).expect("backup dir");
    fs::write(&pending, &original).expect("pending backup");

    let report = provision(&ctx, &mut host);

    assert!(report.failure.is_none(), "{:?}", report.failure);
    assert_eq!(fs::read(startup_shortcut(&ctx)).expect("startup"), original);
    assert!(!menu_shortcut(&ctx).exists());
    assert!(!pending.exists());
    assert!(host.running.is_empty());
    assert!(!sanitize_pending(&ctx.layout));

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn failed_sanitize_is_completed_by_next_run() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);
    host.fail_kill = true;

    let report = provision(&ctx, &mut host);

    let failure = report.failure.as_ref().expect("kill failure must be fatal");
    assert_eq!(failure.stage, StageId::ServingDaemon);
    assert_eq!(failure.error.class(), "third-party-installer");
    assert!(sanitize_pending(&ctx.layout));
    assert!(startup_shortcut(&ctx).exists());

    host.fail_kill = false;
    let report = provision(&ctx, &mut host);

    assert!(report.failure.is_none(), "{:?}", report.failure);
    assert_eq!(report.outcomes[4].status, StageStatus::Skipped);
    assert_eq!(report.outcomes[5].status, StageStatus::Succeeded);
    assert!(!startup_shortcut(&ctx).exists());
    assert!(!menu_shortcut(&ctx).exists());
    assert_eq!(host.user_path.as_deref(), Some(r"C:\Windows\system32"));
    assert!(host.running.is_empty());
    assert!(!sanitize_pending(&ctx.layout));
    assert!(!ctx.layout.daemon_installer_path().exists());

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn requirement_excluded_by_marker_does_not_block_packages_stage() {
    let ctx = test_context();
    fs::write(
        ctx.requirements_path(),
        format!("{REQUIREMENTS}uvloop; sys_platform != \"win32\"\n"),
    )
    .expect("requirements");
    let mut host = FakeHost::for_context(&ctx);

    let first = provision(&ctx, &mut host);
    assert!(first.failure.is_none(), "{:?}", first.failure);
    assert_eq!(first.outcomes[3].status, StageStatus::Succeeded);
    assert!(!ctx.layout.site_packages_dir().join("uvloop-1.0.dist-info").exists());

    let second = provision(&ctx, &mut host);
    assert_eq!(statuses(&second), vec![StageStatus::Skipped; 6]);

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn repeated_run_rewrites_only_the_run_journal() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);
    let journal_path = ctx.layout.run_journal_path();
    let first = provision(&ctx, &mut host);
    write_run_journal(&ctx.layout, &first.run_journal(1_771_000_000)).expect("first journal");
    let mut before = snapshot_tree(ctx.layout.root());

    let second = provision(&ctx, &mut host);
    write_run_journal(&ctx.layout, &second.run_journal(1_771_000_060)).expect("second journal");
    let mut after = snapshot_tree(ctx.layout.root());

    assert_ne!(
        before.remove(&journal_path),
        after.remove(&journal_path),
        "each run records its own timestamp"
    );
    assert_eq!(after, before);
    let journal = read_run_journal(&ctx.layout)
        .expect("read journal")
        .expect("journal exists");
    assert_eq!(journal.result, RunResult::Succeeded);
    assert!(journal
        .outcomes
        .iter()
        .all(|outcome| outcome.status == StageStatus::Skipped));

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn provision_without_shell_folders_skips_shortcut_handling() {
    let base = test_context();
    let ctx = ProvisionContext::new(base.layout.clone(), BootstrapConfig::default(), None)
        .expect("context");
    let mut host = FakeHost::for_context(&ctx);

    let report = provision(&ctx, &mut host);

    assert!(report.failure.is_none(), "{:?}", report.failure);
    assert!(host.running.is_empty());

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn stage_satisfied_reads_without_side_effects() {
    let ctx = test_context();
    let before = snapshot_tree(ctx.layout.root());

    assert!(!stage_satisfied(&ctx, StageId::Runtime).expect("runtime"));
    assert!(!stage_satisfied(&ctx, StageId::PathConfig).expect("path config"));
    assert!(!stage_satisfied(&ctx, StageId::Packages).expect("packages"));
    assert!(!stage_satisfied(&ctx, StageId::Model).expect("model"));
    assert_eq!(snapshot_tree(ctx.layout.root()), before);

    fs::remove_file(ctx.requirements_path()).expect("remove requirements");
    assert!(stage_satisfied(&ctx, StageId::Packages).is_err());
    let entries = collect_stage_status(&ctx);
    assert!(entries[3].1.is_err());

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn run_journal_records_failure_class() {
    let ctx = test_context();
    let mut host = FakeHost::for_context(&ctx);
    host.offline = true;
    let report = provision(&ctx, &mut host);

    write_run_journal(&ctx.layout, &report.run_journal(1_771_000_000)).expect("write journal");
    let journal = read_run_journal(&ctx.layout)
        .expect("read journal")
        .expect("journal exists");

    assert_eq!(
        journal.result,
        RunResult::Failed {
            class: "network".to_string()
        }
    );
    assert_eq!(journal.outcomes, report.outcomes);
    assert_eq!(journal.finished_at_unix, 1_771_000_000);

    let _ = fs::remove_dir_all(ctx.layout.root());
}

#[test]
fn load_config_defaults_when_file_absent() {
    let layout = test_layout();
    assert_eq!(
        load_config(&layout, None).expect("defaults"),
        BootstrapConfig::default()
    );
}

#[test]
fn load_config_reads_workspace_file() {
    let layout = test_layout();
    fs::create_dir_all(layout.root()).expect("root");
    fs::write(
        layout.config_path(),
        "[model]\nname = \"deepseek-ocr:latest\"\nsettle_secs = 10\n",
    )
    .expect("config");

    let config = load_config(&layout, None).expect("config");
    assert_eq!(config.model.name, "deepseek-ocr:latest");
    assert_eq!(config.model.settle_secs, 10);
    assert_eq!(config.model.bind, "127.0.0.1:11435");

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn load_config_requires_explicit_file() {
    let layout = test_layout();
    let err = load_config(&layout, Some(Path::new("/nonexistent/localocr.toml")))
        .expect_err("explicit config must exist");
    assert!(err.to_string().contains("failed to read config"));
}

#[test]
fn load_config_names_file_on_invalid_contents() {
    let layout = test_layout();
    fs::create_dir_all(layout.root()).expect("root");
    fs::write(layout.config_path(), "[model]\nbind = \"0.0.0.0:11435\"\n").expect("config");

    let err = load_config(&layout, None).expect_err("non-loopback bind must be rejected");
    assert!(err.to_string().starts_with("invalid config:"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn cli_defaults_to_no_subcommand() {
    let cli = Cli::try_parse_from(["localocr-setup"]).expect("must parse");
    assert_eq!(cli.command, None);
    assert!(!cli.verbose);
}

#[test]
fn cli_parses_root_config_and_status() {
    let cli = Cli::try_parse_from([
        "localocr-setup",
        "--root",
        "stack",
        "--config",
        "custom.toml",
        "-v",
        "status",
    ])
    .expect("must parse");
    assert_eq!(cli.root, Some(PathBuf::from("stack")));
    assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
    assert!(cli.verbose);
    assert_eq!(cli.command, Some(Commands::Status));
}

#[test]
fn cli_parses_show_config() {
    let cli = Cli::try_parse_from(["localocr-setup", "show-config"]).expect("must parse");
    assert_eq!(cli.command, Some(Commands::ShowConfig));
}

#[test]
fn resolve_output_style_respects_tty_and_no_color() {
    assert_eq!(resolve_output_style(true, false), OutputStyle::Rich);
    assert_eq!(resolve_output_style(true, true), OutputStyle::Plain);
    assert_eq!(resolve_output_style(false, false), OutputStyle::Plain);
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "stage 1/6 runtime: succeeded"),
        "stage 1/6 runtime: succeeded"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "skip", "stage 2/6 path-config: skipped"),
        "[SKIP] stage 2/6 path-config: skipped"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "run journal not written"),
        "[WARN] run journal not written"
    );
}

#[test]
fn format_stage_outcome_line_maps_status_to_badge() {
    let outcome = StageOutcome {
        stage: StageId::ServingDaemon,
        status: StageStatus::Failed,
    };
    assert_eq!(
        format_stage_outcome_line(&outcome, OutputStyle::Rich),
        "[ERR] stage 5/6 serving-daemon: failed"
    );
    assert_eq!(
        format_stage_outcome_line(&outcome, OutputStyle::Plain),
        "stage 5/6 serving-daemon: failed"
    );
}

#[test]
fn format_failure_lines_name_class_then_detail() {
    let failure = localocr_core::StageFailure {
        stage: StageId::Runtime,
        error: ProvisionError::Network(anyhow!("request failed: https://example.test/python.zip")),
    };
    let lines = format_failure_lines(&failure, OutputStyle::Plain);
    assert_eq!(
        lines[0],
        "fatal: download failed; check the network connection and run setup again"
    );
    assert_eq!(
        lines[1],
        "stage 1 (runtime) failed: network error: request failed: https://example.test/python.zip"
    );
}

#[test]
fn format_stage_status_lines_cover_every_state() {
    let lines = format_stage_status_lines(
        &[
            (StageId::Runtime, Ok(true)),
            (StageId::PathConfig, Ok(false)),
            (StageId::Packages, Err("no manifest".to_string())),
        ],
        OutputStyle::Rich,
    );
    assert_eq!(lines[0], "[OK] stage 1/6 runtime: satisfied");
    assert_eq!(
        lines[1],
        "[..] stage 2/6 path-config: missing (enable site-packages in runtime path configuration)"
    );
    assert_eq!(lines[2], "[WARN] stage 4/6 packages: unknown (no manifest)");
}

#[test]
fn format_run_journal_lines_without_journal() {
    assert_eq!(
        format_run_journal_lines(None, OutputStyle::Plain),
        vec!["last run: none recorded".to_string()]
    );
}
