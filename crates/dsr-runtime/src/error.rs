use std::fmt;

use dsr_schemas::SourceSide;

/// A source fetch that had to stop. Everything else (inaccessible pages,
/// exhausted retries on one unit, missing anchors) is absorbed by the
/// fetchers and only logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub source: SourceSide,
    pub message: String,
}

impl FetchError {
    pub fn new(source: SourceSide, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} source: {}", self.source.as_str(), self.message)
    }
}

impl std::error::Error for FetchError {}
