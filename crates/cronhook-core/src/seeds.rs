use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::jobs::JobDescriptor;
use crate::ConfigError;

/// Jobs created and started at boot.
#[derive(Debug, Deserialize)]
pub struct SeedFile {
    pub jobs: Vec<JobDescriptor>,
}

/// Load and validate the seed-jobs file.
///
/// Only file-level rules are checked here (non-empty, unique names); each
/// descriptor is fully validated when the scheduler constructs the job.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_seed_jobs(path: &Path) -> Result<SeedFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::JobsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_seed_jobs(&content)
}

/// Parse and validate seed jobs from YAML text.
///
/// # Errors
///
/// Returns `ConfigError` if the YAML is malformed or fails validation.
pub fn parse_seed_jobs(yaml: &str) -> Result<SeedFile, ConfigError> {
    let seed_file: SeedFile = serde_yaml::from_str(yaml)?;
    validate_seed_jobs(&seed_file)?;
    Ok(seed_file)
}

fn validate_seed_jobs(seed_file: &SeedFile) -> Result<(), ConfigError> {
    let mut seen_names = HashSet::new();

    for job in &seed_file.jobs {
        let name = job.name.trim();
        if name.is_empty() {
            return Err(ConfigError::Validation(
                "job name must be non-empty".to_string(),
            ));
        }

        if !seen_names.insert(name) {
            return Err(ConfigError::Validation(format!(
                "duplicate job name: '{name}'"
            )));
        }
    }

    Ok(())
}
