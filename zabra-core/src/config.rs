//! Layered configuration loading.
//!
//! Every key resolves in the same order: command-line flag, then the
//! `ZABRA_*` environment variable, then the config file, then the built-in
//! default. Environment names are the key upper-cased with `.` replaced by
//! `_`, so `runner.timeout_secs` is read from `ZABRA_RUNNER_TIMEOUT_SECS`.
//!
//! A config file that cannot be read or parsed is logged and skipped; the
//! remaining layers still apply.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Result, ZabraError};
use crate::models::MAX_APPLY_TIMEOUT;

pub const ENV_PREFIX: &str = "ZABRA";
pub const CONFIG_DIR_NAME: &str = ".zabra";
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// File names tried in each search directory, in order.
pub const CONFIG_FILE_NAMES: [&str; 3] = ["config.toml", "config.yaml", "config.yml"];

pub const CONFIG_KEY: &str = "config";
pub const RUNNER_TIMEOUT_KEY: &str = "runner.timeout_secs";

/// Values supplied on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    config: Option<String>,
    runner: RunnerFileConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunnerFileConfig {
    timeout_secs: Option<u64>,
}

/// Fully resolved configuration handed to subcommands
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZabraConfig {
    pub config: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file_used: Option<PathBuf>,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerConfig {
    pub timeout_secs: u64,
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: MAX_APPLY_TIMEOUT.as_secs(),
        }
    }
}

/// Environment variable name bound to a config key.
pub fn env_key(key: &str) -> String {
    format!("{}_{}", ENV_PREFIX, key.replace('.', "_").to_uppercase())
}

/// `~/.zabra/config.toml`, or a relative `.zabra/config.toml` without a home directory.
pub fn default_config_path(home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) => home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME),
        None => Path::new(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME),
    }
}

/// Locations searched, in order, when no config file is named explicitly.
pub fn search_paths(home: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(home) = home {
        dirs.push(home.join(CONFIG_DIR_NAME));
    }
    dirs.push(PathBuf::from("."));

    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .collect()
}

impl ZabraConfig {
    /// Configuration with no file, flag or environment applied.
    pub fn built_in(home: Option<&Path>) -> Self {
        Self {
            config: default_config_path(home),
            config_file_used: None,
            runner: RunnerConfig::default(),
        }
    }
}

/// YAML for `.yaml`/`.yml` files, TOML for everything else.
fn parse_file_config(path: &Path, text: &str) -> std::result::Result<FileConfig, String> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(text).map_err(|e| e.to_string()),
        _ => toml::from_str(text).map_err(|e| e.to_string()),
    }
}

fn parse_or_skip(path: &Path, text: &str) -> (FileConfig, Option<PathBuf>) {
    match parse_file_config(path, text) {
        Ok(parsed) => (parsed, Some(path.to_path_buf())),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Ignoring unparsable zabra config file"
            );
            (FileConfig::default(), None)
        }
    }
}

fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Built-in defaults for the current user's home directory.
pub fn built_in_config() -> ZabraConfig {
    ZabraConfig::built_in(dirs::home_dir().as_deref())
}

/// Load configuration from the real filesystem and process environment.
pub fn load_config(overrides: &ConfigOverrides) -> Result<ZabraConfig> {
    let home = dirs::home_dir();
    load_config_from_sources(
        overrides,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        home.as_deref(),
    )
}

pub fn load_config_from_sources<FRead, FEnv>(
    overrides: &ConfigOverrides,
    read_file: FRead,
    env_lookup: FEnv,
    home: Option<&Path>,
) -> Result<ZabraConfig>
where
    FRead: Fn(&Path) -> std::io::Result<String>,
    FEnv: Fn(&str) -> Option<String>,
{
    let env_value = |key: &str| env_lookup(&env_key(key)).filter(|v| !v.trim().is_empty());

    let explicit = overrides
        .config
        .clone()
        .or_else(|| env_value(CONFIG_KEY).map(PathBuf::from))
        .map(|path| expand_home(&path, home));

    let (file_config, config_file_used) = match &explicit {
        Some(path) => match read_file(path) {
            Ok(text) => parse_or_skip(path, &text),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable zabra config file"
                );
                (FileConfig::default(), None)
            }
        },
        None => match find_config_file(&read_file, home) {
            Some((path, text)) => parse_or_skip(&path, &text),
            None => (FileConfig::default(), None),
        },
    };

    if let Some(path) = &config_file_used {
        info!(path = %path.display(), "Using zabra config file");
    }

    let timeout_secs = match overrides.timeout_secs {
        Some(secs) => secs,
        None => match env_value(RUNNER_TIMEOUT_KEY) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                ZabraError::InvalidConfiguration(format!(
                    "invalid {} value `{raw}`: expected positive integer seconds",
                    env_key(RUNNER_TIMEOUT_KEY)
                ))
            })?,
            None => file_config
                .runner
                .timeout_secs
                .unwrap_or(MAX_APPLY_TIMEOUT.as_secs()),
        },
    };
    if timeout_secs == 0 {
        return Err(ZabraError::InvalidConfiguration(format!(
            "{RUNNER_TIMEOUT_KEY} must be positive"
        )));
    }

    let config = explicit
        .or_else(|| {
            file_config
                .config
                .map(|path| expand_home(Path::new(&path), home))
        })
        .unwrap_or_else(|| default_config_path(home));

    Ok(ZabraConfig {
        config,
        config_file_used,
        runner: RunnerConfig { timeout_secs },
    })
}

fn find_config_file<FRead>(read_file: &FRead, home: Option<&Path>) -> Option<(PathBuf, String)>
where
    FRead: Fn(&Path) -> std::io::Result<String>,
{
    search_paths(home)
        .into_iter()
        .find_map(|path| match read_file(&path) {
            Ok(text) => Some((path, text)),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No readable config file");
                None
            }
        })
}
