use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageId {
    Runtime,
    PathConfig,
    InstallerTool,
    Packages,
    ServingDaemon,
    Model,
}

impl StageId {
    pub const ALL: [StageId; 6] = [
        Self::Runtime,
        Self::PathConfig,
        Self::InstallerTool,
        Self::Packages,
        Self::ServingDaemon,
        Self::Model,
    ];

    pub fn ordinal(self) -> u8 {
        match self {
            Self::Runtime => 1,
            Self::PathConfig => 2,
            Self::InstallerTool => 3,
            Self::Packages => 4,
            Self::ServingDaemon => 5,
            Self::Model => 6,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.ordinal() == ordinal)
    }

    pub fn first() -> Self {
        Self::Runtime
    }

    pub fn next(self) -> Option<Self> {
        Self::from_ordinal(self.ordinal() + 1)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::PathConfig => "path-config",
            Self::InstallerTool => "installer-tool",
            Self::Packages => "packages",
            Self::ServingDaemon => "serving-daemon",
            Self::Model => "model",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == value)
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Runtime => "install embedded Python runtime",
            Self::PathConfig => "enable site-packages in runtime path configuration",
            Self::InstallerTool => "install pip",
            Self::Packages => "install application packages",
            Self::ServingDaemon => "install Ollama serving daemon",
            Self::Model => "pull OCR model",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Skipped,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "skipped" => Some(Self::Skipped),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: StageId,
    pub status: StageStatus,
}

/// Fatal failure classes. Every variant halts the run; there is no local recovery.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("network error: {0:#}")]
    Network(anyhow::Error),
    #[error("extraction error: {0:#}")]
    Extract(anyhow::Error),
    #[error("package install error: {0:#}")]
    PackageInstall(anyhow::Error),
    #[error("third-party installer error: {0:#}")]
    ThirdPartyInstall(anyhow::Error),
    #[error("model pull error: {0:#}")]
    ModelPull(anyhow::Error),
    #[error("unexpected error: {0:#}")]
    Unexpected(anyhow::Error),
}

impl ProvisionError {
    pub fn class(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Extract(_) => "extraction",
            Self::PackageInstall(_) => "package-install",
            Self::ThirdPartyInstall(_) => "third-party-installer",
            Self::ModelPull(_) => "model-pull",
            Self::Unexpected(_) => "unexpected",
        }
    }

    /// One-line guidance shown to the user before the detail chain.
    pub fn fatal_message(&self) -> &'static str {
        match self {
            Self::Network(_) => {
                "download failed; check the network connection and run setup again"
            }
            Self::Extract(_) => {
                "archive extraction failed; check free disk space and run setup again"
            }
            Self::PackageInstall(_) => {
                "package installation failed; check the network connection and run setup again"
            }
            Self::ThirdPartyInstall(_) => {
                "Ollama installation failed; check permissions and run setup again"
            }
            Self::ModelPull(_) => {
                "model download failed; check the network connection and run setup again"
            }
            Self::Unexpected(_) => {
                "a required local file is missing; restore the application files and run setup again"
            }
        }
    }
}

#[derive(Debug, Error)]
#[error("stage {} ({}) failed: {error}", .stage.ordinal(), .stage.as_str())]
pub struct StageFailure {
    pub stage: StageId,
    pub error: ProvisionError,
}
