use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::model::ModelRef;
use crate::payload::PayloadKind;

pub const DEFAULT_CONFIG_FILE_NAME: &str = "localocr.toml";

const MAX_SETTLE_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapConfig {
    pub runtime: RuntimeConfig,
    pub installer_tool: InstallerToolConfig,
    pub packages: PackagesConfig,
    pub daemon: DaemonConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub url: String,
    pub sha256: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            url: "https://www.python.org/ftp/python/3.12.10/python-3.12.10-embed-amd64.zip"
                .to_string(),
            sha256: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct InstallerToolConfig {
    pub url: String,
    pub sha256: Option<String>,
}

impl Default for InstallerToolConfig {
    fn default() -> Self {
        Self {
            url: "https://bootstrap.pypa.io/get-pip.py".to_string(),
            sha256: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PackagesConfig {
    /// Requirements manifest, relative to the workspace root.
    pub requirements: String,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            requirements: "requirements.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub installer_url: String,
    pub sha256: Option<String>,
    /// Passed verbatim; `/DIR=<target>` is always appended.
    pub installer_flags: Vec<String>,
    /// Processes the installer launches on its own; killed after it exits.
    pub process_names: Vec<String>,
    pub shortcut_name: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            installer_url: "https://ollama.com/download/OllamaSetup.exe".to_string(),
            sha256: None,
            installer_flags: [
                "/VERYSILENT",
                "/SUPPRESSMSGBOXES",
                "/NORESTART",
                "/SP-",
                "/NOICONS",
                "/MERGETASKS=!desktopicon",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            process_names: vec!["ollama app.exe".to_string(), "ollama.exe".to_string()],
            shortcut_name: "Ollama.lnk".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub name: String,
    /// Loopback address the transient daemon binds; kept off the daemon's default 11434.
    pub bind: String,
    pub settle_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "deepseek-ocr:3b".to_string(),
            bind: "127.0.0.1:11435".to_string(),
            settle_secs: 5,
        }
    }
}

impl ModelConfig {
    pub fn model_ref(&self) -> anyhow::Result<ModelRef> {
        ModelRef::parse(&self.name)
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.bind
            .trim()
            .parse::<SocketAddr>()
            .with_context(|| format!("model.bind is not a valid socket address: '{}'", self.bind))
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

impl BootstrapConfig {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse localocr config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string(self).context("failed to serialize localocr config")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate_download_url("runtime.url", &self.runtime.url, PayloadKind::Zip)?;
        validate_download_url(
            "installer_tool.url",
            &self.installer_tool.url,
            PayloadKind::PythonScript,
        )?;
        validate_download_url(
            "daemon.installer_url",
            &self.daemon.installer_url,
            PayloadKind::Exe,
        )?;

        for (key, digest) in [
            ("runtime.sha256", &self.runtime.sha256),
            ("installer_tool.sha256", &self.installer_tool.sha256),
            ("daemon.sha256", &self.daemon.sha256),
        ] {
            if let Some(digest) = digest {
                validate_sha256_hex(key, digest)?;
            }
        }

        if self.packages.requirements.trim().is_empty() {
            return Err(anyhow!("packages.requirements must not be empty"));
        }
        if self.daemon.process_names.is_empty()
            || self
                .daemon
                .process_names
                .iter()
                .any(|name| name.trim().is_empty())
        {
            return Err(anyhow!(
                "daemon.process_names must list at least one non-empty process name"
            ));
        }
        if self.daemon.shortcut_name.trim().is_empty()
            || self.daemon.shortcut_name.contains(['/', '\\'])
        {
            return Err(anyhow!(
                "daemon.shortcut_name must be a bare file name: '{}'",
                self.daemon.shortcut_name
            ));
        }

        self.model
            .model_ref()
            .context("model.name is not a valid model identifier")?;
        let bind = self.model.bind_addr()?;
        if !bind.ip().is_loopback() {
            return Err(anyhow!(
                "model.bind must be a loopback address, got '{}'",
                self.model.bind
            ));
        }
        if self.model.settle_secs > MAX_SETTLE_SECS {
            return Err(anyhow!(
                "model.settle_secs must be at most {MAX_SETTLE_SECS}, got {}",
                self.model.settle_secs
            ));
        }

        Ok(())
    }
}

fn validate_download_url(key: &str, url: &str, expected: PayloadKind) -> anyhow::Result<()> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{key} must not be empty"));
    }
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(anyhow!("{key} must be an http(s) URL: '{trimmed}'"));
    }
    match PayloadKind::infer_from_url(trimmed) {
        Some(kind) if kind == expected => Ok(()),
        _ => Err(anyhow!(
            "{key} must point at a .{} payload: '{trimmed}'",
            expected.file_extension()
        )),
    }
}

fn validate_sha256_hex(key: &str, digest: &str) -> anyhow::Result<()> {
    let trimmed = digest.trim();
    if trimmed.len() != 64 || !trimmed.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(anyhow!("{key} must be a 64-character hex sha256 digest"));
    }
    Ok(())
}
