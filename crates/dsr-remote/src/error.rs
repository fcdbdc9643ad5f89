use std::fmt;

/// Failure talking to one of the remote collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Credentials rejected. Aborts the phase; never retried.
    Auth { status: u16, message: String },
    /// Rate limiting, 5xx, timeouts, connection failures. Retried.
    Transient(String),
    /// The caller may not read this resource. Treated as empty.
    Inaccessible { status: u16, message: String },
    /// Any other unexpected status. The unit is dropped, not retried.
    Http { status: u16, message: String },
    /// Response body did not have the expected shape.
    Decode(String),
    /// Missing secret or unusable endpoint. Aborts the phase.
    Config(String),
    /// Local filesystem failure (report fallback).
    Io(String),
    /// The run was cancelled before the call could be (re)attempted.
    Cancelled,
}

impl RemoteError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RemoteError::Auth { .. } | RemoteError::Config(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Auth { status, message } => {
                write!(f, "authentication rejected ({status}): {message}")
            }
            RemoteError::Transient(msg) => write!(f, "transient error: {msg}"),
            RemoteError::Inaccessible { status, message } => {
                write!(f, "inaccessible ({status}): {message}")
            }
            RemoteError::Http { status, message } => write!(f, "http error ({status}): {message}"),
            RemoteError::Decode(msg) => write!(f, "decode error: {msg}"),
            RemoteError::Config(msg) => write!(f, "config error: {msg}"),
            RemoteError::Io(msg) => write!(f, "io error: {msg}"),
            RemoteError::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else if e.is_builder() {
            RemoteError::Config(e.to_string())
        } else {
            // timeouts, connect failures, broken bodies
            RemoteError::Transient(e.to_string())
        }
    }
}

/// Keep error bodies short enough for a log line.
pub(crate) fn preview(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

/// Status mapping of the block-tree API: 401 is fatal, 400/403/404 mean the
/// resource is not shared with us.
pub(crate) fn classify_document_status(status: u16, body: &str) -> RemoteError {
    let message = preview(body, 200);
    match status {
        401 => RemoteError::Auth { status, message },
        400 | 403 | 404 => RemoteError::Inaccessible { status, message },
        429 | 500..=599 => RemoteError::Transient(format!("status {status}: {message}")),
        _ => RemoteError::Http { status, message },
    }
}

/// Status mapping of the rule API: 401 and 403 both mean an expired token.
pub(crate) fn classify_rule_status(status: u16, body: &str) -> RemoteError {
    let message = preview(body, 200);
    match status {
        401 | 403 => RemoteError::Auth { status, message },
        429 | 500..=599 => RemoteError::Transient(format!("status {status}: {message}")),
        _ => RemoteError::Http { status, message },
    }
}
