//! Exposition parsing errors

use thiserror::Error;

/// Errors that can occur while decoding a scrape payload
///
/// Every variant is fatal for the whole payload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Malformed line
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// Sample has neither a metric name nor a `__name__` label
    #[error("line {line}: missing metric name")]
    MissingMetricName { line: usize },

    /// Same label name given twice on one sample
    #[error("line {line}: duplicate label name {name:?}")]
    DuplicateLabel { line: usize, name: String },

    /// Payload is not valid UTF-8
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// Non-blank content after the `# EOF` marker
    #[error("line {line}: content after # EOF")]
    ContentAfterEof { line: usize },

    /// Content type this parser cannot decode (protobuf)
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
}

impl ParseError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }
}

/// Result type for exposition parsing
pub type ParseResult<T> = Result<T, ParseError>;
