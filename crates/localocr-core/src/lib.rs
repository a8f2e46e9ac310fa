mod config;
mod model;
mod payload;
mod stage;

pub use config::{
    BootstrapConfig, DaemonConfig, InstallerToolConfig, ModelConfig, PackagesConfig,
    RuntimeConfig, DEFAULT_CONFIG_FILE_NAME,
};
pub use model::ModelRef;
pub use payload::PayloadKind;
pub use stage::{ProvisionError, StageFailure, StageId, StageOutcome, StageStatus};
