//! Configuration for triage.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TRIAGE_HOME)
//! 2. Config file (.triage/config.yaml)
//! 3. Defaults (~/.triage, built-in retry and timeout policy)
//!
//! Config file discovery:
//! - Searches current directory and parents for .triage/config.yaml
//! - `paths.home` in the config file is relative to the .triage/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::abilities::{CallTimeouts, ProviderSettings, RetryPolicy};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".triage";
const HOME_ENV: &str = "TRIAGE_HOME";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,

    /// Retry policy for external abilities
    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    #[serde(default)]
    pub timeouts: Option<CallTimeouts>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to the .triage/ directory)
    pub home: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to triage home (checkpoints, audit logs)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Retry and timeout settings for the ability provider
    pub provider: ProviderSettings,
}

impl ResolvedConfig {
    /// Directory holding one subdirectory per run
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Resolve configuration from an optional config file and home override
fn resolve(config_file: Option<PathBuf>, env_home: Option<String>) -> Result<ResolvedConfig> {
    let default_home = || -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(CONFIG_DIR))
    };

    let (home, provider) = match config_file {
        Some(ref config_path) => {
            let config = load_config_file(config_path)?;

            let home = if let Some(env_home) = env_home {
                PathBuf::from(env_home)
            } else if let Some(ref home_path) = config.paths.home {
                let triage_dir = config_path.parent().unwrap_or(Path::new("."));
                resolve_path(triage_dir, home_path)
            } else {
                default_home()?
            };

            let provider = ProviderSettings {
                retry: config.retry.unwrap_or_default(),
                timeouts: config.timeouts.unwrap_or_default(),
            };

            (home, provider)
        }
        None => {
            let home = match env_home {
                Some(env_home) => PathBuf::from(env_home),
                None => default_home()?,
            };
            (home, ProviderSettings::default())
        }
    };

    Ok(ResolvedConfig {
        home,
        config_file,
        provider,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    resolve(find_config_file(), std::env::var(HOME_ENV).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the triage home directory.
pub fn triage_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the runs directory ($TRIAGE_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.runs_dir())
}

/// Get the ability provider settings
pub fn provider_settings() -> Result<ProviderSettings> {
    Ok(config()?.provider.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(body: &str) -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let triage_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&triage_dir).unwrap();

        let config_path = triage_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", body).unwrap();
        (temp, config_path)
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, None).unwrap();

        let expected_home = dirs::home_dir().unwrap().join(".triage");
        assert_eq!(config.home, expected_home);
        assert_eq!(config.runs_dir(), expected_home.join("runs"));
        assert!(config.config_file.is_none());
        assert_eq!(config.provider.retry.max_attempts, 3);
    }

    #[test]
    fn test_env_home_wins() {
        let (_temp, path) = write_config(
            r#"
version: "1.0"
paths:
  home: ./state
"#,
        );

        let config = resolve(Some(path), Some("/srv/triage".to_string())).unwrap();
        assert_eq!(config.home, PathBuf::from("/srv/triage"));
    }

    #[test]
    fn test_config_file_parsing() {
        let (_temp, path) = write_config(
            r#"
version: "1.0"
paths:
  home: ./
retry:
  max_attempts: 5
  initial_delay_ms: 50
timeouts:
  external_ms: 750
"#,
        );

        let file = load_config_file(&path).unwrap();
        assert_eq!(file.version, "1.0");
        assert_eq!(file.paths.home, Some("./".to_string()));

        let config = resolve(Some(path.clone()), None).unwrap();
        assert_eq!(config.provider.retry.max_attempts, 5);
        assert_eq!(config.provider.retry.initial_delay_ms, 50);
        // unspecified fields keep their defaults
        assert_eq!(config.provider.retry.max_delay_ms, 5000);
        assert_eq!(config.provider.timeouts.external_ms, 750);
        assert_eq!(config.provider.timeouts.internal_ms, 2000);
        assert_eq!(config.config_file, Some(path));
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let (_temp, path) = write_config("retry: [not, a, map]");
        assert!(resolve(Some(path), None).is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
