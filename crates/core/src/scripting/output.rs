//! Live output streaming for script runs.
//!
//! A caller that wants output as it is produced registers an
//! [`OutputSink`] on the [`RunRequest`](super::executor::RunRequest)
//! before the run starts. Events are best-effort: a dropped receiver does
//! not affect the run.

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sending half registered on a run request.
pub type OutputSink = mpsc::UnboundedSender<OutputEvent>;

/// Which interpreter stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Diagnostic,
}

/// One line of output from a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputEvent {
    pub run_id: Uuid,
    pub stream: OutputStream,
    pub line: String,
}

/// Create a sink/receiver pair for [`RunRequest::stream_to`](super::executor::RunRequest::stream_to).
pub fn channel() -> (OutputSink, mpsc::UnboundedReceiver<OutputEvent>) {
    mpsc::unbounded_channel()
}

/// Push a line to `sink` if one is registered.
pub(crate) fn emit(sink: Option<&OutputSink>, run_id: Uuid, stream: OutputStream, line: &str) {
    if let Some(tx) = sink {
        let _ = tx.send(OutputEvent {
            run_id,
            stream,
            line: line.to_string(),
        });
    }
}
