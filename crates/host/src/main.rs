//! `stb-host` -- runs one automation script through the pooled engine.
//!
//! Initializes the engine, executes the startup script, logs the result,
//! and stops the engine. Exits non-zero if any step fails.
//!
//! # Environment variables
//!
//! | Variable                           | Required | Default      | Description                       |
//! |------------------------------------|----------|--------------|-----------------------------------|
//! | `STB_SCRIPT`                       | yes      | --           | Path of the startup script        |
//! | `STB_SCRIPT_PARAMS`                | no       | `{}`         | JSON object of script parameters  |
//! | `STB_MIN_CONTEXTS`                 | no       | `2`          | Contexts opened at startup        |
//! | `STB_MAX_CONTEXTS`                 | no       | `10`         | Maximum concurrent contexts       |
//! | `STB_ALLOW_UNRESTRICTED_EXECUTION` | no       | `true`       | Pass policy-bypass arguments      |
//! | `STB_INTERPRETER`                  | no       | `powershell` | `powershell`, `bash`, `python`, or a program |
//! | `STB_RUN_TIMEOUT_SECS`             | no       | --           | Per-run time limit                |

use stb_core::config::EngineConfig;
use stb_core::scripting::engine::Engine;
use stb_host::config::HostConfig;
use stb_host::startup;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stb_host=info,stb_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host = HostConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid host configuration");
        std::process::exit(1);
    });

    let engine_config = EngineConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid engine configuration");
        std::process::exit(1);
    });

    tracing::info!(
        script = %host.script.display(),
        interpreter = %engine_config.interpreter.program,
        min = engine_config.min_contexts,
        max = engine_config.max_contexts,
        "Starting stb-host",
    );

    let engine = Engine::new(engine_config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid engine configuration");
        std::process::exit(1);
    });

    let result = startup::run_startup_script(&engine, host.request()).await;
    engine.stop_all();

    match result {
        Ok(output) => {
            if !output.stdout.is_empty() {
                print!("{}", output.stdout);
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Startup script failed");
            std::process::exit(1);
        }
    }
}
