//! Interpreter launch configuration.
//!
//! An [`InterpreterConfig`] describes how a script body is handed to an
//! external interpreter program: fixed arguments, the arguments that lift
//! the interpreter's execution policy, and how run parameters are bound to
//! the script's declared parameters.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ContextError;

use super::executor::Parameters;

/// Environment variable prefix used by the non-PowerShell presets.
pub const DEFAULT_PARAM_ENV_PREFIX: &str = "STB_PARAM_";

/// How run parameters reach the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum ParameterBinding {
    /// `-Name value` argument pairs after the script path. Booleans bind as
    /// `-Name:$true` / `-Name:$false` so switch parameters work.
    Named,
    /// One environment variable per parameter, `{prefix}{Name}=value`.
    Environment { prefix: String },
}

/// Launch configuration for one interpreter flavour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Program name (looked up on `PATH`) or path to the interpreter binary.
    pub program: String,
    /// Arguments always passed before the script path.
    pub args: Vec<String>,
    /// Arguments passed only when unrestricted execution is allowed.
    pub bypass_args: Vec<String>,
    /// Flag that precedes the script path (e.g. `-File`), if any.
    pub file_flag: Option<String>,
    /// Extension given to the materialized script file.
    pub script_extension: String,
    pub binding: ParameterBinding,
}

impl InterpreterConfig {
    /// PowerShell 7 (`pwsh`), non-interactive, no profile.
    pub fn powershell() -> Self {
        Self {
            program: "pwsh".to_string(),
            args: vec![
                "-NoLogo".to_string(),
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
            ],
            bypass_args: vec!["-ExecutionPolicy".to_string(), "Bypass".to_string()],
            file_flag: Some("-File".to_string()),
            script_extension: "ps1".to_string(),
            binding: ParameterBinding::Named,
        }
    }

    pub fn bash() -> Self {
        Self {
            program: "bash".to_string(),
            args: vec![],
            bypass_args: vec![],
            file_flag: None,
            script_extension: "sh".to_string(),
            binding: ParameterBinding::Environment {
                prefix: DEFAULT_PARAM_ENV_PREFIX.to_string(),
            },
        }
    }

    pub fn python() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec![],
            bypass_args: vec![],
            file_flag: None,
            script_extension: "py".to_string(),
            binding: ParameterBinding::Environment {
                prefix: DEFAULT_PARAM_ENV_PREFIX.to_string(),
            },
        }
    }

    /// An arbitrary program invoked as `<program> <script>`.
    pub fn custom(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            bypass_args: vec![],
            file_flag: None,
            script_extension: "script".to_string(),
            binding: ParameterBinding::Environment {
                prefix: DEFAULT_PARAM_ENV_PREFIX.to_string(),
            },
        }
    }

    /// Select a preset by name, falling back to [`InterpreterConfig::custom`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "powershell" | "pwsh" => Self::powershell(),
            "bash" => Self::bash(),
            "python" | "python3" => Self::python(),
            _ => Self::custom(name.trim()),
        }
    }

    /// File name used when a context materializes a script body.
    pub fn script_file_name(&self) -> String {
        format!("script.{}", self.script_extension)
    }

    /// Full argument list for running `script_file`.
    pub fn command_args(
        &self,
        script_file: &Path,
        unrestricted: bool,
        parameters: &Parameters,
    ) -> Vec<OsString> {
        let mut argv: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        if unrestricted {
            argv.extend(self.bypass_args.iter().map(OsString::from));
        }
        if let Some(flag) = &self.file_flag {
            argv.push(OsString::from(flag));
        }
        argv.push(script_file.as_os_str().to_owned());

        if self.binding == ParameterBinding::Named {
            for (name, value) in parameters {
                match value {
                    Value::Bool(b) => argv.push(format!("-{name}:${b}").into()),
                    other => {
                        argv.push(format!("-{name}").into());
                        argv.push(render_value(other).into());
                    }
                }
            }
        }
        argv
    }

    /// Environment variables carrying the parameters, if bound that way.
    pub fn environment(&self, parameters: &Parameters) -> Vec<(String, String)> {
        match &self.binding {
            ParameterBinding::Named => vec![],
            ParameterBinding::Environment { prefix } => parameters
                .iter()
                .map(|(name, value)| (format!("{prefix}{name}"), render_value(value)))
                .collect(),
        }
    }

    /// Locate the interpreter binary.
    ///
    /// Programs containing a path separator must exist as given; bare names
    /// are searched on `PATH`.
    pub fn resolve_program(&self) -> Result<PathBuf, ContextError> {
        let program = Path::new(&self.program);
        if program.components().count() > 1 {
            return if program.is_file() {
                Ok(program.to_path_buf())
            } else {
                Err(ContextError::InterpreterNotFound(self.program.clone()))
            };
        }

        let path_var = std::env::var_os("PATH").unwrap_or_default();
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(program);
            if candidate.is_file() {
                return Ok(candidate);
            }
            if cfg!(windows) {
                let exe = candidate.with_extension("exe");
                if exe.is_file() {
                    return Ok(exe);
                }
            }
        }
        Err(ContextError::InterpreterNotFound(self.program.clone()))
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self::powershell()
    }
}

/// Render a parameter value as interpreter text.
///
/// Strings pass through unquoted, `null` becomes empty, everything else is
/// compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
