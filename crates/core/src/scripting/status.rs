//! Engine lifecycle states.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of an [`Engine`](super::engine::Engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Constructed, never successfully initialized.
    Uninitialized,
    /// Pool open; runs are accepted.
    Ready,
    /// Pool disposed by `stop_all`. May be initialized again.
    Stopped,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Stopped => "stopped",
        }
    }

    pub fn accepts_runs(self) -> bool {
        self == Self::Ready
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
