//! Host configuration loaded from environment variables.

use std::path::PathBuf;

use stb_core::scripting::executor::{Parameters, RunRequest};

/// Errors while reading the host's own settings.
#[derive(Debug, thiserror::Error)]
pub enum HostConfigError {
    #[error("STB_SCRIPT environment variable is required")]
    MissingScript,

    #[error("STB_SCRIPT_PARAMS must be a JSON object: {0}")]
    InvalidParams(String),
}

/// Which script the host runs at startup, and with what parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    pub script: PathBuf,
    pub parameters: Parameters,
}

impl HostConfig {
    /// | Env Var             | Required | Description                        |
    /// |---------------------|----------|------------------------------------|
    /// | `STB_SCRIPT`        | yes      | Path of the startup script         |
    /// | `STB_SCRIPT_PARAMS` | no       | JSON object of script parameters   |
    pub fn from_env() -> Result<Self, HostConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HostConfigError> {
        let script = lookup("STB_SCRIPT")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .ok_or(HostConfigError::MissingScript)?;

        let parameters = match lookup("STB_SCRIPT_PARAMS") {
            None => Parameters::new(),
            Some(raw) if raw.trim().is_empty() => Parameters::new(),
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| HostConfigError::InvalidParams(e.to_string()))?,
        };

        Ok(Self { script, parameters })
    }

    pub fn request(&self) -> RunRequest {
        RunRequest::new(&self.script).parameters(self.parameters.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
