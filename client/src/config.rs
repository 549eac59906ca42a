// Host configuration
// Resolves supervisor timings, daemon locations and logging settings from the environment

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::daemon::launch::BuildMode;

/// Delay between an unexpected daemon exit and the next launch attempt
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(10);

/// Hard limit on graceful daemon shutdown before the host exits anyway
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Entry point handed to `go run` in development builds
pub const DEFAULT_DEV_ENTRYPOINT: &str = "../frontend/main.go";

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Single-line human readable output
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("Unknown log format: {}", other)),
        }
    }
}

/// Errors raised while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var} has an invalid value: {message}")]
    InvalidValue { var: &'static str, message: String },
    #[error("could not determine the directory of the current executable: {0}")]
    ExecutableDir(#[source] std::io::Error),
}

/// Configuration for the host process and the daemon it supervises
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether the daemon is launched from a release binary or via `go run`
    pub build_mode: BuildMode,
    /// Directory holding the platform-specific daemon executables
    pub frontend_dir: PathBuf,
    /// Explicit daemon executable, bypassing the platform naming scheme
    pub frontend_binary: Option<PathBuf>,
    /// Go entry point used in development builds
    pub dev_entrypoint: PathBuf,
    /// Delay before relaunching a daemon that exited on its own
    pub restart_delay: Duration,
    /// Upper bound on relaunches over the host's lifetime; a healthy run does not
    /// reset the count. `None` retries forever
    pub max_restarts: Option<u32>,
    /// Bound on waiting for the daemon to exit during teardown
    pub shutdown_timeout: Duration,
    /// `EnvFilter` directive for the log subscriber
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// `from_env` is this with `std::env::var`; tests pass a map instead of
    /// touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let build_mode = match get("AETHER_DEV") {
            Some(value) if is_truthy(&value) => BuildMode::Development,
            _ => BuildMode::Production,
        };

        let frontend_dir = match get("AETHER_FRONTEND_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => Self::default_frontend_dir()?,
        };

        let log_format = match get("AETHER_LOG_FORMAT") {
            Some(value) => value
                .parse()
                .map_err(|message| ConfigError::InvalidValue {
                    var: "AETHER_LOG_FORMAT",
                    message,
                })?,
            None => LogFormat::default(),
        };

        Ok(Self {
            build_mode,
            frontend_dir,
            frontend_binary: get("AETHER_FRONTEND_BIN").map(PathBuf::from),
            dev_entrypoint: get("AETHER_DEV_ENTRYPOINT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DEV_ENTRYPOINT)),
            restart_delay: parse_millis(
                "AETHER_RESTART_DELAY_MS",
                get("AETHER_RESTART_DELAY_MS"),
            )?
            .unwrap_or(DEFAULT_RESTART_DELAY),
            max_restarts: parse_u32("AETHER_MAX_RESTARTS", get("AETHER_MAX_RESTARTS"))?,
            shutdown_timeout: parse_millis(
                "AETHER_SHUTDOWN_TIMEOUT_MS",
                get("AETHER_SHUTDOWN_TIMEOUT_MS"),
            )?
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
            log_filter: get("AETHER_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            log_format,
        })
    }

    /// Daemon executables ship next to the host binary
    fn default_frontend_dir() -> Result<PathBuf, ConfigError> {
        let exe = std::env::current_exe().map_err(ConfigError::ExecutableDir)?;
        exe.parent().map(|p| p.to_path_buf()).ok_or_else(|| {
            ConfigError::ExecutableDir(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine exe directory",
            ))
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_u32(var: &'static str, value: Option<String>) -> Result<Option<u32>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidNumber { var, value: v })
        })
        .transpose()
}

fn parse_millis(var: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidNumber { var, value: v })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.build_mode, BuildMode::Production);
        assert_eq!(config.restart_delay, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
        assert_eq!(config.max_restarts, None);
        assert_eq!(config.frontend_binary, None);
        assert_eq!(config.dev_entrypoint, PathBuf::from("../frontend/main.go"));
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.log_format, LogFormat::Compact);

        // Executables are looked up next to the running binary by default
        let exe_dir = std::env::current_exe().unwrap();
        assert_eq!(config.frontend_dir, exe_dir.parent().unwrap());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("AETHER_DEV", "true"),
            ("AETHER_FRONTEND_DIR", "/opt/aether"),
            ("AETHER_FRONTEND_BIN", "/opt/aether/custom-frontend"),
            ("AETHER_DEV_ENTRYPOINT", "/src/frontend/main.go"),
            ("AETHER_RESTART_DELAY_MS", "250"),
            ("AETHER_MAX_RESTARTS", "4"),
            ("AETHER_SHUTDOWN_TIMEOUT_MS", "500"),
            ("AETHER_LOG", "aether_client_lib=debug"),
            ("AETHER_LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.build_mode, BuildMode::Development);
        assert_eq!(config.frontend_dir, PathBuf::from("/opt/aether"));
        assert_eq!(
            config.frontend_binary,
            Some(PathBuf::from("/opt/aether/custom-frontend"))
        );
        assert_eq!(config.dev_entrypoint, PathBuf::from("/src/frontend/main.go"));
        assert_eq!(config.restart_delay, Duration::from_millis(250));
        assert_eq!(config.max_restarts, Some(4));
        assert_eq!(config.shutdown_timeout, Duration::from_millis(500));
        assert_eq!(config.log_filter, "aether_client_lib=debug");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_dev_flag_values() {
        for value in ["1", "true", "YES", "on"] {
            let config = Config::from_lookup(lookup_from(&[("AETHER_DEV", value)])).unwrap();
            assert_eq!(config.build_mode, BuildMode::Development, "value {}", value);
        }
        for value in ["0", "false", "no", ""] {
            let config = Config::from_lookup(lookup_from(&[("AETHER_DEV", value)])).unwrap();
            assert_eq!(config.build_mode, BuildMode::Production, "value {}", value);
        }
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = Config::from_lookup(lookup_from(&[("AETHER_RESTART_DELAY_MS", "soon")]))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("AETHER_RESTART_DELAY_MS"), "{}", message);
        assert!(message.contains("soon"), "{}", message);

        let err = Config::from_lookup(lookup_from(&[("AETHER_MAX_RESTARTS", "-1")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                var: "AETHER_MAX_RESTARTS",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_log_format() {
        let err = Config::from_lookup(lookup_from(&[("AETHER_LOG_FORMAT", "xml")])).unwrap_err();
        assert!(err.to_string().contains("AETHER_LOG_FORMAT"));
    }
}
