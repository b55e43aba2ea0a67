use crate::agent::capture::CaptureConfig;
use crate::agent::throttle::LogConfig;
use crate::{muted_error, weak_error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::read_to_string;

/// Description of a debuggee, forwarded to a control plane at registration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DebuggeeConfig {
    pub description: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    /// Root of the deployed application, frames of scripts outside are not captured.
    pub working_directory: String,
    /// Allow conditions and watch expressions.
    pub allow_expressions: bool,
    pub breakpoint_expiration_sec: u64,
    /// Length of the code a runtime puts in front of the first line of a wrapped module.
    pub module_wrapper_prefix_len: u32,
    pub capture: CaptureConfig,
    pub log: LogConfig,
    pub debuggee: DebuggeeConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let working_directory = std::env::current_dir()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "/".to_string());
        Self {
            working_directory,
            allow_expressions: false,
            breakpoint_expiration_sec: 60 * 60 * 24,
            module_wrapper_prefix_len: 62,
            capture: CaptureConfig::default(),
            log: LogConfig::default(),
            debuggee: DebuggeeConfig::default(),
        }
    }
}

impl AgentConfig {
    const DEFAULT_PATH: &'static str = ".config/livebug/agent.toml";

    /// Load configuration from a TOML file, default path is used if `path` is `None`.
    /// Return default configuration if file not exists or malformed.
    pub fn from_file(path: Option<&str>) -> Self {
        Self::load(path).unwrap_or_default()
    }

    fn load(path: Option<&str>) -> Option<Self> {
        let data = match path {
            None => {
                let path = home::home_dir()?.join(Self::DEFAULT_PATH);
                muted_error!(read_to_string(path))?
            }
            Some(path) => weak_error!(read_to_string(path), "error while load config file:")?,
        };
        Self::from_toml(&data)
    }

    /// Parse configuration, return `None` (and log a warning) if `data` is malformed.
    pub fn from_toml(data: &str) -> Option<Self> {
        weak_error!(toml::from_str(data), "malformed agent config:")
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
