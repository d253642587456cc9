use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from watchdog.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WatchdogConfig {
    pub target: TargetConfig,
    pub service: ServiceConfig,
    pub retry: RetryConfig,
    pub throttle: ThrottleConfig,
    pub files: FilesConfig,
    pub lock: LockConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub success_status: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// Program and arguments; `{service}` is replaced with the service name.
    pub restart_command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_wait_secs: u64,
    pub wait_increment_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub run_every_n_after_failure: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub status: PathBuf,
    pub throttle: PathBuf,
    pub lock: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LockConfig {
    pub on_error: LockFallback,
}

/// What to do when the lock file cannot be opened or locked for a reason
/// other than another instance holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockFallback {
    /// Run without mutual exclusion.
    #[default]
    Proceed,
    /// Give up and exit non-zero.
    Exit,
}

// --- Default implementations ---

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/snapshot".to_string(),
            timeout_secs: 5,
            success_status: 200,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "crowsnest".to_string(),
            restart_command: vec![
                "systemctl".to_string(),
                "restart".to_string(),
                "{service}".to_string(),
            ],
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_wait_secs: 30,
            wait_increment_secs: 30,
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            run_every_n_after_failure: 10,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            status: PathBuf::from("/tmp/crowsnest_watchdog_status.json"),
            throttle: PathBuf::from("/tmp/crowsnest_watchdog_throttle.json"),
            lock: PathBuf::from("/tmp/crowsnest_watchdog.lock"),
        }
    }
}

impl TargetConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl WatchdogConfig {
    /// Load config from `path`. A missing file yields the built-in defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Reject settings the watchdog cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.url.trim().is_empty() {
            return Err(ConfigError::Invalid("target.url must not be empty".into()));
        }
        if self.target.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "target.timeout_secs must be at least 1".into(),
            ));
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_retries must be at least 1".into(),
            ));
        }
        if self.throttle.run_every_n_after_failure == 0 {
            return Err(ConfigError::Invalid(
                "throttle.run_every_n_after_failure must be at least 1".into(),
            ));
        }
        if self.service.restart_command.is_empty() {
            return Err(ConfigError::Invalid(
                "service.restart_command must name a program".into(),
            ));
        }
        Ok(())
    }

    /// Config rooted in `dir`, for tests that must not touch `/tmp` paths.
    #[cfg(test)]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            files: FilesConfig {
                status: dir.join("status.json"),
                throttle: dir.join("throttle.json"),
                lock: dir.join("watchdog.lock"),
            },
            ..Default::default()
        }
    }
}
