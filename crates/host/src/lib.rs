//! `stb-host` library crate.
//!
//! The host is the minimal caller of the engine: initialize once, run the
//! configured startup script, report the outcome, tear down. Modules are
//! exposed for integration testing; the binary entrypoint lives in
//! `main.rs`.

pub mod config;
pub mod startup;
