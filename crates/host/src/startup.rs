//! Startup run: initialize the engine and execute one script.

use stb_core::error::EngineError;
use stb_core::scripting::engine::Engine;
use stb_core::scripting::executor::{ContextFactory, RunOutput, RunRequest};

/// Initialize `engine` and run `request` on it.
///
/// Teardown is left to the caller, which normally happens when the engine
/// is dropped at exit.
pub async fn run_startup_script<F: ContextFactory>(
    engine: &Engine<F>,
    request: RunRequest,
) -> Result<RunOutput, EngineError> {
    engine.initialize().await?;
    tracing::info!(state = %engine.state(), "Script engine initialized");

    let script = request.script_path().display().to_string();
    let output = engine.execute(request).await?;
    tracing::info!(
        script = %script,
        run_id = %output.run_id,
        duration_ms = output.duration_ms,
        "Startup script executed successfully",
    );
    Ok(output)
}
