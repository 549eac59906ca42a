// Launch command construction for the frontend daemon

use std::ffi::OsString;

use super::platform::ExecutableSelector;
use crate::config::Config;

/// Address the daemon uses to reach the client API server
pub const CLIENT_API_HOST: &str = "127.0.0.1";

/// Build tags passed to `go run` in development
pub const DEV_BUILD_TAGS: &str = "extvenabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Packaged daemon executable next to the host
    Production,
    /// Daemon compiled and run from source with `go run`
    Development,
}

impl BuildMode {
    pub fn is_dev(&self) -> bool {
        matches!(self, BuildMode::Development)
    }
}

/// Program and arguments for one daemon launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: OsString,
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Build the launch command for the given local API port
    pub fn new(config: &Config, local_api_port: u16) -> Self {
        let contract = contract_args(config.build_mode, local_api_port);

        match config.build_mode {
            BuildMode::Production => {
                let program = config.frontend_binary.clone().unwrap_or_else(|| {
                    config
                        .frontend_dir
                        .join(ExecutableSelector::current().executable_name())
                });
                Self {
                    program: program.into_os_string(),
                    args: contract,
                }
            }
            BuildMode::Development => {
                let mut args = vec![
                    "run".to_string(),
                    "-tags".to_string(),
                    DEV_BUILD_TAGS.to_string(),
                    config.dev_entrypoint.display().to_string(),
                ];
                args.extend(contract);
                Self {
                    program: OsString::from("go"),
                    args,
                }
            }
        }
    }

    /// Human-readable rendering for logs
    pub fn display(&self) -> String {
        let mut rendered = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

/// Arguments every daemon launch carries: run mode, build flavour, client API address
fn contract_args(mode: BuildMode, local_api_port: u16) -> Vec<String> {
    vec![
        "run".to_string(),
        format!("--isdev={}", mode.is_dev()),
        format!("--clientip={}", CLIENT_API_HOST),
        format!("--clientport={}", local_api_port),
    ]
}
