//! Engine configuration.
//!
//! [`EngineConfig`] fixes the pool bounds, the execution-policy setting,
//! and the interpreter for the lifetime of an engine. It is built either
//! from code or from environment variables via [`EngineConfig::from_env`].

use std::time::Duration;

use crate::error::ConfigError;
use crate::scripting::interpreter::InterpreterConfig;

/// Default number of contexts opened eagerly.
pub const DEFAULT_MIN_CONTEXTS: usize = 2;

/// Default upper bound on concurrently existing contexts.
pub const DEFAULT_MAX_CONTEXTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Contexts created when the pool opens.
    pub min_contexts: usize,
    /// Maximum concurrent contexts, and therefore concurrent runs.
    pub max_contexts: usize,
    /// Pass the interpreter's policy-bypass arguments to every context.
    pub allow_unrestricted_execution: bool,
    pub interpreter: InterpreterConfig,
    /// Per-run wall-clock limit. `None` lets runs go to completion.
    pub run_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_contexts: DEFAULT_MIN_CONTEXTS,
            max_contexts: DEFAULT_MAX_CONTEXTS,
            allow_unrestricted_execution: true,
            interpreter: InterpreterConfig::default(),
            run_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                            | Default      |
    /// |------------------------------------|--------------|
    /// | `STB_MIN_CONTEXTS`                 | `2`          |
    /// | `STB_MAX_CONTEXTS`                 | `10`         |
    /// | `STB_ALLOW_UNRESTRICTED_EXECUTION` | `true`       |
    /// | `STB_INTERPRETER`                  | `powershell` |
    /// | `STB_RUN_TIMEOUT_SECS`             | unset        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`], reading values through `lookup`.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let min_contexts = parse_or(&lookup, "STB_MIN_CONTEXTS", defaults.min_contexts)?;
        let max_contexts = parse_or(&lookup, "STB_MAX_CONTEXTS", defaults.max_contexts)?;

        let allow_unrestricted_execution = match lookup("STB_ALLOW_UNRESTRICTED_EXECUTION") {
            None => defaults.allow_unrestricted_execution,
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidValue {
                key: "STB_ALLOW_UNRESTRICTED_EXECUTION",
                value: raw,
            })?,
        };

        let interpreter = lookup("STB_INTERPRETER")
            .filter(|name| !name.trim().is_empty())
            .map(|name| InterpreterConfig::from_name(&name))
            .unwrap_or(defaults.interpreter);

        let run_timeout = match lookup("STB_RUN_TIMEOUT_SECS") {
            None => None,
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "STB_RUN_TIMEOUT_SECS",
                    value: raw.clone(),
                })?;
                Some(Duration::from_secs(secs))
            }
        };

        let config = Self {
            min_contexts,
            max_contexts,
            allow_unrestricted_execution,
            interpreter,
            run_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rules: `max_contexts >= 1` and `min_contexts <= max_contexts`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_contexts == 0 || self.min_contexts > self.max_contexts {
            return Err(ConfigError::InvalidBounds {
                min: self.min_contexts,
                max: self.max_contexts,
            });
        }
        Ok(())
    }
}

fn parse_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
