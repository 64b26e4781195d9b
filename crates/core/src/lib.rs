//! `stb-core` -- pooled script execution engine.
//!
//! Runs external script files against a bounded pool of reusable
//! interpreter contexts. See [`scripting::engine::Engine`] for the entry
//! point used by host applications.

pub mod config;
pub mod error;
pub mod scripting;
