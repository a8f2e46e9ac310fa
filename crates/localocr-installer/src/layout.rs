use anyhow::{Context, Result};
use localocr_core::{ModelRef, PayloadKind, DEFAULT_CONFIG_FILE_NAME};
use std::fs;
use std::path::{Path, PathBuf};

const PYTHON_DIR: &str = "python";
const OLLAMA_DIR: &str = "ollama";
const MODELS_DIR: &str = "models";
const STATE_DIR: &str = ".localocr";

/// Every path the orchestrator touches, derived from one workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Anchors a relative root at the current directory; installers and the
    /// daemon receive these paths and must not resolve them against their own cwd.
    pub fn from_root_arg(root: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to resolve current directory")?;
        let root = match root {
            Some(root) if root.is_absolute() => root.to_path_buf(),
            Some(root) => cwd.join(root),
            None => cwd,
        };
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn python_dir(&self) -> PathBuf {
        self.root.join(PYTHON_DIR)
    }

    pub fn python_exe(&self) -> PathBuf {
        self.python_dir().join("python.exe")
    }

    pub fn python_scripts_dir(&self) -> PathBuf {
        self.python_dir().join("Scripts")
    }

    pub fn pip_entry_point(&self) -> PathBuf {
        self.python_scripts_dir().join("pip.exe")
    }

    pub fn site_packages_dir(&self) -> PathBuf {
        self.python_dir().join("Lib").join("site-packages")
    }

    pub fn ollama_dir(&self) -> PathBuf {
        self.root.join(OLLAMA_DIR)
    }

    pub fn ollama_exe(&self) -> PathBuf {
        self.ollama_dir().join("ollama.exe")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join(MODELS_DIR)
    }

    pub fn model_manifest_path(&self, model: &ModelRef) -> PathBuf {
        self.models_dir().join(model.manifest_rel_path())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn shortcut_backups_dir(&self) -> PathBuf {
        self.state_dir().join("shortcut-backups")
    }

    pub fn sanitize_pending_path(&self) -> PathBuf {
        self.state_dir().join("sanitize-pending")
    }

    pub fn run_journal_path(&self) -> PathBuf {
        self.state_dir().join("last-run")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(DEFAULT_CONFIG_FILE_NAME)
    }

    pub fn requirements_path(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    pub fn transient_payload_path(&self, stem: &str, kind: PayloadKind) -> PathBuf {
        self.root.join(format!("{stem}.{}", kind.file_extension()))
    }

    pub fn runtime_archive_path(&self) -> PathBuf {
        self.transient_payload_path("python", PayloadKind::Zip)
    }

    pub fn pip_bootstrap_path(&self) -> PathBuf {
        self.transient_payload_path("get-pip", PayloadKind::PythonScript)
    }

    pub fn daemon_installer_path(&self) -> PathBuf {
        self.transient_payload_path("OllamaSetup", PayloadKind::Exe)
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.state_dir(), self.shortcut_backups_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
