mod app_config;
mod config;
pub mod jobs;
pub mod seeds;

pub use app_config::{AppConfig, Environment, SqsConfig};
pub use config::{load_app_config, load_app_config_from_env};
pub use jobs::{FireAt, HttpMethod, JobDescriptor, JobEdit, QueueKind, SearchCriteria};
pub use seeds::{load_seed_jobs, SeedFile};

use thiserror::Error;

/// Operational timezone used when `CRONHOOK_TIMEZONE` is not set.
pub const DEFAULT_TIMEZONE: chrono_tz::Tz = chrono_tz::America::Argentina::Buenos_Aires;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read jobs file {path}: {source}")]
    JobsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse jobs file: {0}")]
    JobsFileParse(#[from] serde_yaml::Error),

    #[error("invalid jobs file: {0}")]
    Validation(String),
}
