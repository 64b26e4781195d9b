//! Pooled script execution.
//!
//! [`engine::Engine`] owns a [`pool::ContextPool`] of execution contexts
//! and dispatches [`executor::RunRequest`]s through it. Process-backed
//! contexts live in [`process`]; the interpreter launch rules live in
//! [`interpreter`].

pub mod engine;
pub mod executor;
pub mod interpreter;
pub mod output;
pub mod pool;
pub mod process;
pub mod status;
pub mod subprocess;
