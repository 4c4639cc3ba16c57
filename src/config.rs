use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable consulted when no `--config=` flag was given.
pub const CONFIG_PATH_ENV_VAR: &str = "SPECRUN_CONFIG_PATH";

/// Default config location, relative to the project base dir.
pub const DEFAULT_CONFIG_PATH: &str = "spec/support/specrun.json";

/// On-disk runner configuration (`specrun.json`). Every field is optional in
/// the file; command-line options override whatever is configured here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Directory containing spec files, relative to the project base dir.
    pub spec_dir: String,
    /// Glob patterns (relative to `spec_dir`) selecting spec files.
    pub spec_files: Vec<String>,
    /// Glob patterns (relative to `spec_dir`) selecting helper scripts.
    pub helpers: Vec<String>,
    /// Commands run once, in the project base dir, before any spec executes.
    pub requires: Vec<String>,
    pub random: bool,
    pub seed: Option<String>,
    /// Skip the remaining cases of a spec file after its first failure.
    pub stop_spec_on_expectation_failure: bool,
    /// Stop scheduling further spec files after one fails.
    pub stop_on_spec_failure: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            spec_dir: "spec".to_string(),
            spec_files: vec!["**/*.spec.txt".to_string()],
            helpers: vec!["helpers/**/*.sh".to_string()],
            requires: Vec::new(),
            random: false,
            seed: None,
            stop_spec_on_expectation_failure: false,
            stop_on_spec_failure: false,
        }
    }
}

/// Loads configuration for a run.
///
/// Lookup order: the explicit path (from `--config=`), else the
/// `SPECRUN_CONFIG_PATH` environment variable, else the default location
/// under the project base dir. A missing default file yields built-in
/// defaults; an explicitly named file that cannot be read or parsed is an
/// error.
pub fn load_config(project_base_dir: &Path, explicit_path: Option<&str>) -> Result<RunnerConfig> {
    let requested = explicit_path
        .map(str::to_string)
        .or_else(|| std::env::var(CONFIG_PATH_ENV_VAR).ok().filter(|v| !v.is_empty()));

    match requested {
        Some(p) => read_config(&resolve(project_base_dir, &p)),
        None => {
            let path = project_base_dir.join(DEFAULT_CONFIG_PATH);
            if path.is_file() {
                read_config(&path)
            } else {
                Ok(RunnerConfig::default())
            }
        }
    }
}

fn resolve(base: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

fn read_config(path: &Path) -> Result<RunnerConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::ReadConfig {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| Error::ParseConfig {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
