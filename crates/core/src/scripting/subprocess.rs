//! Interpreter subprocess management.
//!
//! Provides [`run_command`], which spawns a prepared interpreter
//! [`Command`], pipes the run parameters to stdin as JSON, collects stdout
//! and stderr line by line, and enforces the run's timeout and the pool's
//! cancellation token.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use uuid::Uuid;

use crate::error::ContextError;

use super::executor::{Diagnostic, RunOutput, ScriptInvocation};
use super::output::{self, OutputSink, OutputStream};

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output beyond this limit is drained but neither stored nor streamed.
/// No single read buffers more than the remaining budget.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Spawn `cmd`, feed it the invocation's parameters, and wait for it.
///
/// The caller sets the program, arguments, and environment. Stdio pipes,
/// the working directory, and kill-on-drop are applied here. `label` names
/// the interpreter in the exit-status diagnostic.
pub async fn run_command(
    cmd: &mut Command,
    label: &str,
    context_id: usize,
    invocation: &ScriptInvocation,
) -> Result<RunOutput, ContextError> {
    // `kill_on_drop(true)` ensures the child is killed when dropped on timeout or cancel.
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &invocation.working_directory {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    let run_id = invocation.run_id;
    let mut stdout_task = tokio::spawn(read_lines(
        child.stdout.take(),
        run_id,
        OutputStream::Stdout,
        invocation.output.clone(),
    ));
    let mut stderr_task = tokio::spawn(read_lines(
        child.stderr.take(),
        run_id,
        OutputStream::Diagnostic,
        invocation.output.clone(),
    ));

    // Written from its own task so a script that never reads stdin cannot
    // stall the wait below.
    if let Some(mut stdin) = child.stdin.take() {
        let payload = serde_json::to_vec(&invocation.parameters).unwrap_or_default();
        tokio::spawn(async move {
            let _ = stdin.write_all(&payload).await;
        });
    }

    // The readers are joined under the same deadline and token as the wait:
    // a background grandchild can hold the pipes open after the interpreter
    // itself has exited.
    let collected = {
        let collect = async {
            let status = child.wait().await?;
            let duration_ms = start.elapsed().as_millis() as u64;
            let stdout_lines = (&mut stdout_task).await.unwrap_or_default();
            let stderr_lines = (&mut stderr_task).await.unwrap_or_default();
            Ok::<_, ContextError>((status, duration_ms, stdout_lines, stderr_lines))
        };
        let bounded = async {
            match invocation.timeout {
                Some(limit) => match tokio::time::timeout(limit, collect).await {
                    Ok(result) => result,
                    Err(_) => Err(ContextError::Timeout {
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    }),
                },
                None => collect.await,
            }
        };
        tokio::select! {
            collected = bounded => collected,
            () = invocation.cancel.cancelled() => Err(ContextError::Cancelled),
        }
    };
    // On timeout or cancel `child` is dropped on return, which kills it.
    if collected.is_err() {
        stdout_task.abort();
        stderr_task.abort();
    }
    let (status, duration_ms, stdout_lines, stderr_lines) = collected?;

    let mut stdout = String::new();
    for line in &stdout_lines {
        stdout.push_str(line);
        stdout.push('\n');
    }

    let mut diagnostics: Vec<Diagnostic> = stderr_lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| Diagnostic::new(line.as_str()))
        .collect();

    let exit_code = status.code().unwrap_or(-1);
    if !status.success() {
        let record = format!("{label} exited with code {exit_code}");
        output::emit(
            invocation.output.as_ref(),
            run_id,
            OutputStream::Diagnostic,
            &record,
        );
        diagnostics.push(Diagnostic::new(record));
    }

    let parsed_output = serde_json::from_str(stdout.trim()).ok();

    Ok(RunOutput {
        run_id,
        context_id,
        stdout,
        diagnostics,
        exit_code,
        duration_ms,
        parsed_output,
    })
}

/// Read a stream to EOF as lossy UTF-8 lines, capped at [`MAX_OUTPUT_BYTES`].
///
/// Each stored line is also forwarded to `sink`; blank diagnostic lines
/// are not forwarded.
async fn read_lines<R: AsyncRead + Unpin>(
    handle: Option<R>,
    run_id: Uuid,
    stream: OutputStream,
    sink: Option<OutputSink>,
) -> Vec<String> {
    let mut lines = Vec::new();
    let Some(handle) = handle else {
        return lines;
    };

    let mut reader = BufReader::new(handle);
    let mut buf = Vec::new();
    let mut captured = 0usize;
    loop {
        let remaining = MAX_OUTPUT_BYTES.saturating_sub(captured);
        if remaining == 0 {
            let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
            break;
        }
        buf.clear();
        // A line longer than the remaining budget is cut at the cap.
        match (&mut reader)
            .take(remaining as u64)
            .read_until(b'\n', &mut buf)
            .await
        {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                captured += n;
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']).to_string();
                if stream == OutputStream::Stdout || !line.trim().is_empty() {
                    output::emit(sink.as_ref(), run_id, stream, &line);
                }
                lines.push(line);
            }
        }
    }
    lines
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
