use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default config file name, looked up in the working directory when no
/// explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "pipewright.toml";

fn default_fetch_timeout_secs() -> u64 {
    120
}

fn default_sandbox_image() -> String {
    "alpine:3".to_string()
}

fn default_cpus() -> f64 {
    1.0
}

fn default_memory() -> String {
    "512m".to_string()
}

fn default_pids_limit() -> u32 {
    256
}

fn default_sandbox_timeout_secs() -> u64 {
    600
}

fn default_attempts() -> u32 {
    3
}

fn default_base_delay_secs() -> f64 {
    1.0
}

fn default_release_api() -> String {
    "https://api.github.com".to_string()
}

fn default_registry_tag() -> String {
    "latest".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_image")]
    pub image: String,
    #[serde(default = "default_cpus")]
    pub cpus: f64,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: u32,
    #[serde(default = "default_sandbox_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_sandbox_image(),
            cpus: default_cpus(),
            memory: default_memory(),
            pids_limit: default_pids_limit(),
            timeout_secs: default_sandbox_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            base_delay_secs: default_base_delay_secs(),
        }
    }
}

/// Connection parameters per publish backend. Each table is optional; a
/// backend selected on the command line without its table is a config error.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PublishConfig {
    pub nexus: Option<RepositoryTarget>,
    pub artifactory: Option<RepositoryTarget>,
    pub release: Option<ReleaseTarget>,
    pub registry: Option<RegistryTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryTarget {
    pub base_url: String,
    pub repository: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseTarget {
    #[serde(default = "default_release_api")]
    pub api_url: String,
    pub owner: String,
    pub repo: String,
    pub token: String,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryTarget {
    pub base_url: String,
    pub repository: String,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_registry_tag")]
    pub tag: String,
}

impl Config {
    /// Loads config from an explicit path, or from `pipewright.toml` in the
    /// working directory, falling back to defaults when neither exists.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(raw) => {
                let expanded = shellexpand::tilde(raw).into_owned();
                Self::load_file(Path::new(&expanded))
            }
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::load_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.fetch.timeout_secs, 120);
        assert_eq!(cfg.sandbox.image, "alpine:3");
        assert!((cfg.sandbox.cpus - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.sandbox.memory, "512m");
        assert_eq!(cfg.sandbox.pids_limit, 256);
        assert_eq!(cfg.retry.attempts, 3);
        assert!(cfg.publish.nexus.is_none());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.retry.attempts, 3);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = Config::load(Some("/nonexistent/pipewright.toml")).expect_err("must fail");
        assert!(err.to_string().contains("/nonexistent/pipewright.toml"));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
[fetch]
timeout_secs = 30

[publish.nexus]
base_url = "https://nexus.example.com"
repository = "releases"
username = "ci"
password = "secret"

[publish.registry]
base_url = "https://registry.example.com"
repository = "team/app"
"#
        )
        .unwrap();
        let cfg = Config::load(Some(f.path().to_str().unwrap())).unwrap();
        assert_eq!(cfg.fetch.timeout_secs, 30);
        assert_eq!(cfg.sandbox.timeout_secs, 600);
        let nexus = cfg.publish.nexus.unwrap();
        assert_eq!(nexus.repository, "releases");
        assert_eq!(nexus.username.as_deref(), Some("ci"));
        let registry = cfg.publish.registry.unwrap();
        assert_eq!(registry.tag, "latest");
        assert!(registry.token.is_none());
    }

    #[test]
    fn malformed_toml_reports_the_path() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "[fetch\ntimeout_secs = 30").unwrap();
        let err = Config::load(Some(f.path().to_str().unwrap())).expect_err("must fail");
        assert!(err.to_string().contains("failed to load config"));
    }
}
