use std::error::Error;

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;

/// Failures that stop the service from starting or serving. Payload
/// failures never surface here, they end up in the block sink.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to install metrics recorder: {0}")]
    MetricsRecorder(#[from] BuildError),
    #[error("admin server failed: {0}")]
    AdminServer(#[source] std::io::Error),
}

const PREVIEW_CHARS: usize = 256;

/// Diagnostic for input that failed to parse, as sent to the block sink.
pub fn parse_failure_message(
    input: &str,
    err: &(dyn Error + 'static),
    remote: Option<&str>,
) -> String {
    let preview: String = input.trim_end().chars().take(PREVIEW_CHARS).collect();
    let mut message = format!("WF-300 Cannot parse: \"{preview}\", reason: \"{err}\"");
    append_context(&mut message, err, remote);
    message
}

/// Diagnostic for an error raised by the connection itself.
pub fn transport_failure_message(err: &(dyn Error + 'static), remote: Option<&str>) -> String {
    let mut message = format!("WF-301 Error while receiving data, reason: \"{err}\"");
    append_context(&mut message, err, remote);
    message
}

fn append_context(message: &mut String, err: &(dyn Error + 'static), remote: Option<&str>) {
    let root = root_cause(err).to_string();
    if root != err.to_string() {
        message.push_str(&format!(", root cause: \"{root}\""));
    }
    if let Some(remote) = remote {
        message.push_str(&format!("; remote: {remote}"));
    }
}

/// Walks the `source()` chain down to the innermost error.
pub fn root_cause<'a>(err: &'a (dyn Error + 'static)) -> &'a (dyn Error + 'static) {
    let mut current = err;
    while let Some(next) = current.source() {
        current = next;
    }
    current
}
